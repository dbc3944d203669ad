//! Voice style matrices stored as NumPy `.npz` archives.
//!
//! An NPZ file is a ZIP archive of `.npy` members; each member is one voice.
//! Only the layout the voice packs use is accepted: `float32`, C order, any
//! rank.  The first axis indexes token count and the remaining axes are
//! flattened into one style row (`[510, 1, 256]` becomes 510 rows of 256).

use std::{collections::HashMap, io::Read, path::Path};

use anyhow::{bail, ensure, Context, Result};
use zip::ZipArchive;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Per-voice style embeddings, one row per token count.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleMatrix {
    rows: usize,
    width: usize,
    data: Vec<f32>,
}

impl StyleMatrix {
    pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        let rows = shape.first().copied().unwrap_or(1);
        let width: usize = shape.iter().skip(1).product();
        ensure!(rows > 0 && width > 0, "empty style matrix (shape {:?})", shape);
        ensure!(
            data.len() == rows * width,
            "style data has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            rows * width
        );
        Ok(Self { rows, width, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Style row for a sequence of `tokens` tokens, clamped to the last row.
    pub fn row_for(&self, tokens: usize) -> &[f32] {
        let i = tokens.min(self.rows - 1);
        &self.data[i * self.width..(i + 1) * self.width]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NPY parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Decode one `.npy` member into its shape and flat `f32` data.
pub fn parse_npy(bytes: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    ensure!(bytes.len() >= 10 && bytes.starts_with(NPY_MAGIC), "not an NPY file (bad magic)");

    let (header_len, header_start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            ensure!(bytes.len() >= 12, "NPY header truncated");
            (u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize, 12)
        }
        v => bail!("unsupported NPY version {}", v),
    };
    let header_end = header_start + header_len;
    ensure!(bytes.len() >= header_end, "NPY header truncated");
    let header = std::str::from_utf8(&bytes[header_start..header_end])
        .context("NPY header is not UTF-8")?;

    let descr = header_value(header, "descr").context("NPY header has no 'descr'")?;
    let big_endian = match descr.trim_matches(|c| c == '\'' || c == '"') {
        "<f4" | "=f4" | "|f4" => false,
        ">f4" => true,
        other => bail!("unsupported dtype '{}' (float32 only)", other),
    };
    if header_value(header, "fortran_order").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        bail!("Fortran-order arrays are not supported");
    }
    let shape = parse_shape(header_value(header, "shape").context("NPY header has no 'shape'")?)?;

    let count: usize = shape.iter().product();
    let payload = &bytes[header_end..];
    ensure!(
        payload.len() >= count * 4,
        "NPY payload too short: {} bytes for {} values",
        payload.len(),
        count
    );
    let data = payload[..count * 4]
        .chunks_exact(4)
        .map(|b| {
            let raw = [b[0], b[1], b[2], b[3]];
            if big_endian { f32::from_be_bytes(raw) } else { f32::from_le_bytes(raw) }
        })
        .collect();
    Ok((shape, data))
}

/// Raw value of `key` in the Python dict literal of an NPY header.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let start = [format!("'{key}':"), format!("\"{key}\":")]
        .iter()
        .find_map(|k| header.find(k.as_str()).map(|p| p + k.len()))?;
    let rest = header[start..].trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else if let Some(quoted) = rest.strip_prefix(['\'', '"']) {
        quoted.find(['\'', '"'])? + 2
    } else {
        rest.find([',', '}']).unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

/// `(510, 1, 256)` → `[510, 1, 256]`; `()` is a scalar.
fn parse_shape(tuple: &str) -> Result<Vec<usize>> {
    tuple
        .trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("bad shape dim '{}'", t)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Archive loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load every voice in an NPZ archive, keyed by member name without `.npy`.
pub fn load_styles(path: &Path) -> Result<HashMap<String, StyleMatrix>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open voices file: {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Voices file is not an NPZ archive: {}", path.display()))?;

    let mut styles = HashMap::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read NPZ member")?;
        let name = entry.name().trim_end_matches(".npy").to_string();
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).context("Failed to read NPZ member")?;

        let (shape, data) =
            parse_npy(&buf).with_context(|| format!("Bad NPY member '{}'", name))?;
        let matrix =
            StyleMatrix::new(&shape, data).with_context(|| format!("Bad voice '{}'", name))?;
        styles.insert(name, matrix);
    }
    Ok(styles)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
