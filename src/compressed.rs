//! `DATA binary_compressed` bodies, which `pcd-rs` does not read.
//!
//! After the header come two little endian `u32`s (compressed and
//! uncompressed size) and an LZF block. Decompressed, the data is stored
//! field by field: all values of the first field, then all of the second.

use std::io::{BufRead, Read};

use anyhow::{anyhow, bail, ensure, Context, Result};

use crate::cloud::PointXYZ;

#[derive(Debug, Clone, PartialEq)]
struct FieldLayout {
    name: String,
    size: usize,
    kind: char,
    count: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Header {
    fields: Vec<FieldLayout>,
    points: usize,
    data: String,
}

impl Header {
    pub(crate) fn is_compressed(&self) -> bool {
        self.data == "binary_compressed"
    }
}

/// Reads header lines up to and including `DATA`.
pub(crate) fn read_header<R: BufRead>(reader: &mut R) -> Result<Header> {
    let mut names = Vec::new();
    let mut sizes = Vec::new();
    let mut kinds = Vec::new();
    let mut counts = Vec::new();
    let mut width = None;
    let mut height = None;
    let mut points = None;

    let mut raw = Vec::new();

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            bail!("unexpected end of file in PCD header");
        }

        let line = String::from_utf8_lossy(&raw);
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let key = parts.next().unwrap_or_default();
        let values: Vec<&str> = parts.collect();

        match key {
            "FIELDS" => names = values.iter().map(|v| v.to_string()).collect(),
            "SIZE" => sizes = parse_all(&values)?,
            "TYPE" => {
                kinds = values
                    .iter()
                    .map(|v| v.chars().next().unwrap_or('?'))
                    .collect()
            }
            "COUNT" => counts = parse_all(&values)?,
            "WIDTH" => width = values.first().map(|v| v.parse::<usize>()).transpose()?,
            "HEIGHT" => height = values.first().map(|v| v.parse::<usize>()).transpose()?,
            "POINTS" => points = values.first().map(|v| v.parse::<usize>()).transpose()?,
            "DATA" => {
                let data = values.first().copied().unwrap_or_default().to_string();
                return build_header(names, sizes, kinds, counts, width, height, points, data);
            }
            _ => {}
        }
    }
}

fn parse_all(values: &[&str]) -> Result<Vec<usize>> {
    values
        .iter()
        .map(|v| v.parse::<usize>().with_context(|| format!("bad number `{}`", v)))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn build_header(
    names: Vec<String>,
    sizes: Vec<usize>,
    kinds: Vec<char>,
    counts: Vec<usize>,
    width: Option<usize>,
    height: Option<usize>,
    points: Option<usize>,
    data: String,
) -> Result<Header> {
    let counts = if counts.is_empty() {
        vec![1; names.len()]
    } else {
        counts
    };

    ensure!(
        sizes.len() == names.len() && kinds.len() == names.len() && counts.len() == names.len(),
        "FIELDS, SIZE, TYPE and COUNT disagree on the number of fields"
    );

    let points = match (points, width, height) {
        (Some(points), _, _) => points,
        (None, Some(width), Some(height)) => width * height,
        _ => bail!("header has neither POINTS nor WIDTH and HEIGHT"),
    };

    let fields = names
        .into_iter()
        .zip(sizes)
        .zip(kinds)
        .zip(counts)
        .map(|(((name, size), kind), count)| FieldLayout {
            name,
            size,
            kind,
            count,
        })
        .collect();

    Ok(Header {
        fields,
        points,
        data,
    })
}

/// Reads the compressed body following `header` and returns its points.
pub(crate) fn read_points<R: Read>(reader: &mut R, header: &Header) -> Result<Vec<PointXYZ>> {
    let mut sizes = [0u8; 8];
    reader
        .read_exact(&mut sizes)
        .context("missing compressed block sizes")?;

    let compressed_size = u32::from_le_bytes([sizes[0], sizes[1], sizes[2], sizes[3]]) as usize;
    let uncompressed_size = u32::from_le_bytes([sizes[4], sizes[5], sizes[6], sizes[7]]) as usize;

    let point_size: usize = header.fields.iter().map(|f| f.size * f.count).sum();
    let expected = point_size * header.points;
    ensure!(
        uncompressed_size == expected,
        "uncompressed size {} does not match {} points of {} bytes",
        uncompressed_size,
        header.points,
        point_size
    );

    if header.points == 0 {
        return Ok(Vec::new());
    }

    let mut compressed = Vec::new();
    reader
        .by_ref()
        .take(compressed_size as u64)
        .read_to_end(&mut compressed)?;
    ensure!(
        compressed.len() == compressed_size,
        "compressed block is truncated"
    );

    let data = lzf::decompress(&compressed, uncompressed_size)
        .map_err(|e| anyhow!("LZF decompression failed: {:?}", e))?;
    ensure!(
        data.len() == uncompressed_size,
        "decompressed {} bytes, expected {}",
        data.len(),
        uncompressed_size
    );

    let x = column(header, "x")?;
    let y = column(header, "y")?;
    let z = column(header, "z")?;

    (0..header.points)
        .map(|i| {
            Ok(PointXYZ {
                x: x.value(&data, i)?,
                y: y.value(&data, i)?,
                z: z.value(&data, i)?,
            })
        })
        .collect()
}

/// Where one field's values live inside the decompressed block.
#[derive(Debug)]
struct Column {
    offset: usize,
    stride: usize,
    size: usize,
    kind: char,
}

fn column(header: &Header, axis: &str) -> Result<Column> {
    let mut offset = 0;

    for field in &header.fields {
        let stride = field.size * field.count;
        if field.name == axis {
            return Ok(Column {
                offset,
                stride,
                size: field.size,
                kind: field.kind,
            });
        }
        offset += stride * header.points;
    }

    let names: Vec<&str> = header.fields.iter().map(|f| f.name.as_str()).collect();
    bail!("no `{}` field (fields: {})", axis, names.join(" "))
}

impl Column {
    fn value(&self, data: &[u8], index: usize) -> Result<f32> {
        let start = self.offset + index * self.stride;
        let bytes = data
            .get(start..start + self.size)
            .context("field value out of range")?;

        let value = match (self.kind, bytes) {
            ('F', &[a, b, c, d]) => f32::from_le_bytes([a, b, c, d]),
            ('F', &[a, b, c, d, e, f, g, h]) => f64::from_le_bytes([a, b, c, d, e, f, g, h]) as f32,
            ('I', &[a]) => a as i8 as f32,
            ('I', &[a, b]) => i16::from_le_bytes([a, b]) as f32,
            ('I', &[a, b, c, d]) => i32::from_le_bytes([a, b, c, d]) as f32,
            ('U', &[a]) => a as f32,
            ('U', &[a, b]) => u16::from_le_bytes([a, b]) as f32,
            ('U', &[a, b, c, d]) => u32::from_le_bytes([a, b, c, d]) as f32,
            (kind, bytes) => bail!("unsupported field type {}{}", kind, bytes.len()),
        };

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn header(text: &str) -> Header {
        read_header(&mut Cursor::new(text.as_bytes())).unwrap()
    }

    /// LZF stream made only of literal runs.
    fn literal_lzf(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in data.chunks(32) {
            out.push((chunk.len() - 1) as u8);
            out.extend_from_slice(chunk);
        }
        out
    }

    fn body(raw: &[u8]) -> Vec<u8> {
        let compressed = literal_lzf(raw);
        let mut out = Vec::new();
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
        out
    }

    #[test]
    fn header_stops_at_data_line() {
        let mut input = Cursor::new(
            "# comment\nVERSION 0.7\nFIELDS x y z\nSIZE 4 4 4\nTYPE F F F\n\
             WIDTH 2\nHEIGHT 1\nDATA binary_compressed\nrest"
                .as_bytes(),
        );

        let header = read_header(&mut input).unwrap();

        assert!(header.is_compressed());
        assert_eq!(header.points, 2);
        assert_eq!(header.fields[2].count, 1);
        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "rest");
    }

    #[test]
    fn ascii_header_is_not_compressed() {
        let header = header("FIELDS x\nSIZE 4\nTYPE F\nCOUNT 1\nPOINTS 0\nDATA ascii\n");
        assert!(!header.is_compressed());
    }

    #[test]
    fn decodes_column_layout() {
        let header = header(
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nPOINTS 2\nDATA binary_compressed\n",
        );
        let mut raw = Vec::new();
        for v in [1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }

        let points = read_points(&mut Cursor::new(body(&raw)), &header).unwrap();

        assert_eq!(
            points,
            vec![PointXYZ::new(1.0, 2.0, 3.0), PointXYZ::new(4.0, 5.0, 6.0)]
        );
    }

    #[test]
    fn skips_other_columns_and_converts_types() {
        let header = header(
            "FIELDS rgb x y z\nSIZE 4 8 2 4\nTYPE U F I F\nCOUNT 1 1 1 1\nPOINTS 1\n\
             DATA binary_compressed\n",
        );
        let mut raw = Vec::new();
        raw.extend_from_slice(&0xffu32.to_le_bytes());
        raw.extend_from_slice(&0.5f64.to_le_bytes());
        raw.extend_from_slice(&(-3i16).to_le_bytes());
        raw.extend_from_slice(&7.0f32.to_le_bytes());

        let points = read_points(&mut Cursor::new(body(&raw)), &header).unwrap();

        assert_eq!(points, vec![PointXYZ::new(0.5, -3.0, 7.0)]);
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let header = header(
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nPOINTS 2\nDATA binary_compressed\n",
        );

        let err = read_points(&mut Cursor::new(body(&[0u8; 12])), &header).unwrap_err();

        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn truncated_block_is_an_error() {
        let header = header(
            "FIELDS x y z\nSIZE 4 4 4\nTYPE F F F\nCOUNT 1 1 1\nPOINTS 1\nDATA binary_compressed\n",
        );
        let mut input = body(&[0u8; 12]);
        input.truncate(input.len() - 4);

        assert!(read_points(&mut Cursor::new(input), &header).is_err());
    }
}
