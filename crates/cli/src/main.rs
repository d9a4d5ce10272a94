fn main() -> anyhow::Result<()> {
    modproxy_cli::run()
}
