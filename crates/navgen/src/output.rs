// output.rs - Compiled tile files
//
// Each file is a small little-endian header followed by the engine blob:
//   magic "NAVT" | format version | payload size | payload

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::BuildError;
use crate::geometry::{GeometryBatch, TileCoord};

pub const TILE_MAGIC: u32 = u32::from_le_bytes(*b"NAVT");
pub const TILE_FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: u64 = 12;

pub struct TileWriter {
    output_dir: PathBuf,
    world_name: String,
}

impl TileWriter {
    pub fn new(output_dir: &Path, world_name: &str) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            world_name: world_name.to_string(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `{world}_{x}_{y}.map`
    pub fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_{}.map", self.world_name, coord.x, coord.y))
    }

    /// `{world}.map`
    pub fn global_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.map", self.world_name))
    }

    pub fn debug_obj_path(&self, coord: Option<TileCoord>) -> PathBuf {
        match coord {
            Some(c) => self
                .output_dir
                .join(format!("{}_{}_{}.obj", self.world_name, c.x, c.y)),
            None => self.output_dir.join(format!("{}.obj", self.world_name)),
        }
    }

    pub fn write_tile(&self, coord: TileCoord, payload: &[u8]) -> Result<PathBuf, BuildError> {
        let path = self.tile_path(coord);
        write_tile_file(&path, payload)?;
        Ok(path)
    }

    pub fn write_global(&self, payload: &[u8]) -> Result<PathBuf, BuildError> {
        let path = self.global_path();
        write_tile_file(&path, payload)?;
        Ok(path)
    }
}

/// Write header and payload to `path`, all or nothing
pub fn write_tile_file(path: &Path, payload: &[u8]) -> Result<(), BuildError> {
    write_atomically(path, |w| {
        w.write_u32::<LittleEndian>(TILE_MAGIC)?;
        w.write_u32::<LittleEndian>(TILE_FORMAT_VERSION)?;
        w.write_u32::<LittleEndian>(payload.len() as u32)?;
        w.write_all(payload)
    })
}

/// Whether `path` holds a complete tile in the current format
pub fn is_current(path: &Path) -> bool {
    read_header(path).is_ok()
}

fn read_header(path: &Path) -> io::Result<(File, u32)> {
    let mut file = File::open(path)?;
    let magic = file.read_u32::<LittleEndian>()?;
    let version = file.read_u32::<LittleEndian>()?;
    let size = file.read_u32::<LittleEndian>()?;
    if magic != TILE_MAGIC || version != TILE_FORMAT_VERSION {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a current tile file"));
    }
    if file.metadata()?.len() != HEADER_SIZE + size as u64 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "truncated tile file"));
    }
    Ok((file, size))
}

/// Payload of a tile file written by `write_tile_file`
pub fn read_tile_payload(path: &Path) -> io::Result<Vec<u8>> {
    let (mut file, size) = read_header(path)?;
    let mut payload = vec![0u8; size as usize];
    file.read_exact(&mut payload)?;
    Ok(payload)
}

/// Dump batches as Wavefront OBJ, one object per batch
pub fn write_obj(path: &Path, batches: &[GeometryBatch]) -> Result<(), BuildError> {
    write_atomically(path, |w| {
        let mut base = 1usize;
        for batch in batches {
            writeln!(w, "o {}", batch.name.replace(' ', "_"))?;
            writeln!(w, "# area {:?} filter {}", batch.area, batch.filter_walkable)?;
            for v in &batch.mesh.vertices {
                writeln!(w, "v {} {} {}", v[0], v[1], v[2])?;
            }
            for t in &batch.mesh.indices {
                writeln!(
                    w,
                    "f {} {} {}",
                    base + t[0] as usize,
                    base + t[1] as usize,
                    base + t[2] as usize
                )?;
            }
            base += batch.mesh.vertices.len();
        }
        Ok(())
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomically(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> Result<(), BuildError> {
    let io_error = |source: io::Error| BuildError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let temp = temp_path(path);
    let result = write_file(&temp, write).and_then(|()| fs::rename(&temp, path));
    if let Err(source) = result {
        let _ = fs::remove_file(&temp);
        return Err(io_error(source));
    }
    Ok(())
}

fn write_file(path: &Path, write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write(&mut writer)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::AreaFlags;
    use crate::geometry::Mesh;
    use std::sync::Arc;

    #[test]
    fn test_tile_names() {
        let writer = TileWriter::new(Path::new("/out"), "Azeroth");
        assert_eq!(writer.tile_path(TileCoord::new(3, 41)), Path::new("/out/Azeroth_3_41.map"));
        assert_eq!(writer.global_path(), Path::new("/out/Azeroth.map"));
        assert_eq!(writer.debug_obj_path(None), Path::new("/out/Azeroth.obj"));
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TileWriter::new(&dir.path().join("nested"), "Kalimdor");
        let path = writer.write_tile(TileCoord::new(1, 2), b"payload").unwrap();

        assert!(is_current(&path));
        assert_eq!(read_tile_payload(&path).unwrap(), b"payload");
        assert!(!temp_path(&path).exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_SIZE + 7);
    }

    #[test]
    fn test_stale_or_truncated_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.map");
        assert!(!is_current(&missing));

        let path = dir.path().join("Outland_1_1.map");
        write_tile_file(&path, &[1, 2, 3, 4]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.pop();
        fs::write(&path, &bytes).unwrap();
        assert!(!is_current(&path));

        let mut old = Vec::new();
        old.write_u32::<LittleEndian>(TILE_MAGIC).unwrap();
        old.write_u32::<LittleEndian>(TILE_FORMAT_VERSION + 1).unwrap();
        old.write_u32::<LittleEndian>(0).unwrap();
        fs::write(&path, &old).unwrap();
        assert!(!is_current(&path));
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TileWriter::new(dir.path(), "Azeroth");
        let coord = TileCoord::new(5, 5);
        // A directory where the tile should go makes the final rename fail
        fs::create_dir(writer.tile_path(coord)).unwrap();

        let err = writer.write_tile(coord, b"data").unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
        assert_eq!(err.kind(), "IOFailure");
        assert!(!temp_path(&writer.tile_path(coord)).exists());
    }

    #[test]
    fn test_write_obj() {
        let dir = tempfile::tempdir().unwrap();
        let mesh = Arc::new(Mesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2]],
        ));
        let batches = vec![
            GeometryBatch::new("a".into(), mesh.clone(), AreaFlags::TERRAIN, false),
            GeometryBatch::new("b".into(), mesh, AreaFlags::OBJECT, true),
        ];
        let path = dir.path().join("debug.obj");
        write_obj(&path, &batches).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 6);
        assert!(text.contains("f 1 2 3"));
        assert!(text.contains("f 4 5 6"));
        assert!(text.contains("# area OBJECT filter true"));
    }
}
