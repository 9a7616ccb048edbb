// Binary serialization for layer parameters: header, then one block per tensor.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::Tensor;

/// Magic bytes for file format identification: "CUTL"
const MAGIC: &[u8; 4] = b"CUTL";
const VERSION: u8 = 1;

pub const TYPE_LINEAR: u8 = 1;
pub const TYPE_EMBEDDING: u8 = 2;
pub const TYPE_LSTM: u8 = 3;

/// Write a tensor's shape and raw data in little-endian order.
pub fn write_tensor_data<W: Write>(writer: &mut W, data: &[f32], shape: &[usize]) -> io::Result<()> {
    writer.write_all(&(shape.len() as u32).to_le_bytes())?;
    for &dim in shape {
        writer.write_all(&(dim as u32).to_le_bytes())?;
    }

    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    for &val in data {
        writer.write_all(&val.to_le_bytes())?;
    }

    Ok(())
}

pub fn read_tensor_data<R: Read>(reader: &mut R) -> io::Result<(Vec<f32>, Vec<usize>)> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    let shape_len = u32::from_le_bytes(buf) as usize;

    let mut shape = Vec::with_capacity(shape_len);
    for _ in 0..shape_len {
        reader.read_exact(&mut buf)?;
        shape.push(u32::from_le_bytes(buf) as usize);
    }

    reader.read_exact(&mut buf)?;
    let data_len = u32::from_le_bytes(buf) as usize;
    if data_len != shape.iter().product::<usize>() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("tensor data length {} does not match shape {:?}", data_len, shape),
        ));
    }

    let mut data = Vec::with_capacity(data_len);
    for _ in 0..data_len {
        reader.read_exact(&mut buf)?;
        data.push(f32::from_le_bytes(buf));
    }

    Ok((data, shape))
}

/// Write header (magic + version + layer type)
pub fn write_header<W: Write>(writer: &mut W, layer_type: u8) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;
    writer.write_all(&[layer_type])?;
    Ok(())
}

/// Read and verify header
pub fn read_header<R: Read>(reader: &mut R, expected_type: u8) -> io::Result<()> {
    let mut magic_buf = [0u8; 4];
    reader.read_exact(&mut magic_buf)?;

    if &magic_buf != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid file format: magic bytes mismatch",
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;

    if version[0] != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unsupported version: {}", version[0]),
        ));
    }

    let mut layer_type = [0u8; 1];
    reader.read_exact(&mut layer_type)?;

    if layer_type[0] != expected_type {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Layer type mismatch: expected {}, got {}",
                expected_type, layer_type[0]
            ),
        ));
    }

    Ok(())
}

/// Writes a parameter file holding `tensors` in order.
pub fn save_tensors(path: &Path, layer_type: u8, tensors: &[&Tensor]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_header(&mut writer, layer_type)?;
    for t in tensors {
        write_tensor_data(&mut writer, t.as_f32_slice(), &t.shape)?;
    }
    writer.flush()
}

/// Reads `count` tensors written by `save_tensors`.
pub fn load_tensors(path: &Path, layer_type: u8, count: usize) -> io::Result<Vec<Tensor>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    read_header(&mut reader, layer_type)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let (data, shape) = read_tensor_data(&mut reader)?;
        out.push(Tensor { data, shape });
    }
    Ok(out)
}

/// Fails with `InvalidData` when a loaded tensor's shape differs from the
/// layer's current one.
pub fn check_shape(loaded: &Tensor, current: &Tensor, name: &str) -> io::Result<()> {
    if loaded.shape != current.shape {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "shape mismatch for {}: file has {:?}, layer has {:?}",
                name, loaded.shape, current.shape
            ),
        ));
    }
    Ok(())
}
