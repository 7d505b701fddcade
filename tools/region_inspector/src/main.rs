use std::env;
use std::path::Path;

use skarn_persist::region::RegionFile;
use skarn_shared::block::register_default_blocks;

fn main() {
    let Some(path) = env::args().nth(1) else {
        eprintln!("Usage: region_inspector <path/to/file.skr>");
        std::process::exit(2);
    };

    if let Err(err) = run(Path::new(&path)) {
        eprintln!("region_inspector error: {err}");
        std::process::exit(1);
    }
}

fn run(path: &Path) -> Result<(), String> {
    let region = RegionFile::open(path)
        .map_err(|err| format!("failed to open {}: {err}", path.display()))?;
    let registry = register_default_blocks();

    println!("Region: {}", path.display());
    println!("Magic: {:?}", RegionFile::MAGIC);
    println!("Chunk count: {}", region.chunk_count());

    let mut tags: Vec<_> = region.tags().collect();
    tags.sort_by_key(|tag| (tag.pos.y, tag.pos.x));

    for tag in tags {
        let state = if tag.populated { "populated" } else { "generated" };
        println!(
            "  chunk @ ({}, {}) [{state}] entities={} delayed={} metadata={}",
            tag.pos.x,
            tag.pos.y,
            tag.entities.len(),
            tag.delayed_updates.len(),
            tag.metadata.len(),
        );
        if let Err(err) = tag.to_chunk(&registry) {
            println!("    !! grid decode failed: {err}");
        }
    }

    Ok(())
}
