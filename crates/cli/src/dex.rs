use std::fs::File;
use std::os::fd::AsFd;
use std::path::Path;

use anyhow::Context;
use modproxy_client::{DexSegment, ModuleLoadState};
use tabled::{Table, Tabled, settings::Style};

#[derive(Tabled)]
pub(crate) struct SegmentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Size")]
    size: usize,
    #[tabled(rename = "Magic")]
    magic: String,
}

impl From<&DexSegment> for SegmentRow {
    fn from(segment: &DexSegment) -> Self {
        let magic = segment
            .as_bytes()
            .iter()
            .take(8)
            .map(|b| b.escape_ascii().to_string())
            .collect();
        Self {
            name: segment.name().to_string(),
            offset: segment.offset(),
            size: segment.len(),
            magic,
        }
    }
}

pub(crate) fn segment_table(segments: &[DexSegment]) -> String {
    let mut table = Table::new(segments.iter().map(SegmentRow::from));
    table.with(Style::rounded());
    table.to_string()
}

pub fn run(path: &Path) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let state = ModuleLoadState::new(path.to_string_lossy(), file.as_fd());
    let segments = state
        .map_dex_segments()
        .with_context(|| format!("mapping {}", path.display()))?;

    if segments.is_empty() {
        println!("No mappable dex segments in {}", path.display());
        return Ok(());
    }
    println!("{}", segment_table(&segments));
    Ok(())
}
