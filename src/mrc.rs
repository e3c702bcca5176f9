use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Fixed size of the MRC header preceding the voxel data.
pub const HEADER_LEN: u64 = 1024;

/// Grid dimensions of an MRC volume: columns, rows, sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrcDims {
    pub ncol: usize,
    pub nrow: usize,
    pub nsec: usize,
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decodes the dimension words (nx, ny, nz) from the first 12 bytes of
/// an MRC header, little-endian.
pub fn dims_from_header(header: &[u8]) -> Result<MrcDims> {
    if header.len() < 12 {
        bail!("MRC header truncated: {} bytes", header.len());
    }
    let nx = le_i32(&header[0..4]);
    let ny = le_i32(&header[4..8]);
    let nz = le_i32(&header[8..12]);
    if nx <= 0 || ny <= 0 || nz <= 0 {
        bail!("MRC header reports non-positive dimensions {}x{}x{}", nx, ny, nz);
    }
    Ok(MrcDims {
        ncol: nx as usize,
        nrow: ny as usize,
        nsec: nz as usize,
    })
}

/// Reads the volume dimensions from an MRC file header.
pub fn read_dims(path: &Path) -> Result<MrcDims> {
    let mut file =
        File::open(path).with_context(|| format!("opening MRC volume {}", path.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();
    if len < HEADER_LEN {
        bail!(
            "{} is too small to be an MRC volume ({} bytes)",
            path.display(),
            len
        );
    }

    let mut header = [0u8; 12];
    file.read_exact(&mut header)
        .with_context(|| format!("reading MRC header of {}", path.display()))?;
    dims_from_header(&header)
        .with_context(|| format!("decoding MRC header of {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header_bytes(nx: i32, ny: i32, nz: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_LEN as usize];
        bytes[0..4].copy_from_slice(&nx.to_le_bytes());
        bytes[4..8].copy_from_slice(&ny.to_le_bytes());
        bytes[8..12].copy_from_slice(&nz.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_dimension_words() {
        let dims = dims_from_header(&header_bytes(100, 200, 5)).unwrap();
        assert_eq!(
            dims,
            MrcDims {
                ncol: 100,
                nrow: 200,
                nsec: 5
            }
        );
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        assert!(dims_from_header(&header_bytes(0, 200, 5)).is_err());
        assert!(dims_from_header(&header_bytes(100, -1, 5)).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(dims_from_header(&[0u8; 8]).is_err());
    }

    #[test]
    fn reads_dims_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.mrc");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&header_bytes(512, 512, 30))
            .unwrap();
        let dims = read_dims(&path).unwrap();
        assert_eq!(dims.ncol, 512);
        assert_eq!(dims.nrow, 512);
        assert_eq!(dims.nsec, 30);
    }

    #[test]
    fn rejects_file_shorter_than_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.mrc");
        std::fs::write(&path, [0u8; 64]).unwrap();
        assert!(read_dims(&path).is_err());
    }
}
