use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use skarn_persist::region::RegionFile;
use skarn_persist::tag::ChunkTag;
use skarn_shared::coords::ChunkPos;

/// Groups chunk tags into 16x16 region files under `<world>/region/`.
pub struct PersistenceLayer {
    world_dir: PathBuf,
    regions: HashMap<(i32, i32), RegionFile>,
}

impl PersistenceLayer {
    pub fn open(world_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(world_dir)?;
        Ok(Self {
            world_dir: world_dir.to_path_buf(),
            regions: HashMap::new(),
        })
    }

    pub fn load_chunk(&mut self, pos: ChunkPos) -> io::Result<Option<ChunkTag>> {
        let region = self.region_mut(Self::region_coords(pos))?;
        Ok(region.load_chunk(pos))
    }

    pub fn save_chunk(&mut self, tag: ChunkTag) -> io::Result<()> {
        let region = self.region_mut(Self::region_coords(tag.pos))?;
        region.save_chunk(tag);
        region.flush()
    }

    pub fn save_chunks(&mut self, tags: Vec<ChunkTag>) -> io::Result<()> {
        for tag in tags {
            let region = self.region_mut(Self::region_coords(tag.pos))?;
            region.save_chunk(tag);
        }
        self.flush_all()
    }

    pub fn flush_all(&mut self) -> io::Result<()> {
        for region in self.regions.values() {
            region.flush()?;
        }
        Ok(())
    }

    fn region_coords(pos: ChunkPos) -> (i32, i32) {
        (pos.x.div_euclid(16), pos.y.div_euclid(16))
    }

    fn region_path(&self, region_coords: (i32, i32)) -> PathBuf {
        let (rx, ry) = region_coords;
        self.world_dir.join("region").join(format!("r.{rx}.{ry}.skr"))
    }

    fn region_mut(&mut self, region_coords: (i32, i32)) -> io::Result<&mut RegionFile> {
        if !self.regions.contains_key(&region_coords) {
            let region = RegionFile::open(self.region_path(region_coords))?;
            self.regions.insert(region_coords, region);
        }

        self.regions.get_mut(&region_coords).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "failed to access cached region file",
            )
        })
    }
}
