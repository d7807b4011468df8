use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use memmap2::Mmap;
use ndarray::Array2;

use crate::beam::BeamParams;
use crate::error::{MoresaneError, Result};

const CARD_SIZE: usize = 80;
const BLOCK_SIZE: usize = 2880;

/// Parsed primary-HDU header of a FITS file.
#[derive(Clone, Debug)]
pub struct FitsHeader {
    pub bitpix: i32,
    /// NAXIS1..NAXISn, in FITS axis order (axis 1 varies fastest).
    pub axes: Vec<usize>,
    /// CTYPEn world-coordinate axis types, empty string when absent.
    pub ctypes: Vec<String>,
    pub bscale: f64,
    pub bzero: f64,
    data_offset: usize,
}

impl FitsHeader {
    fn bytes_per_element(&self) -> usize {
        (self.bitpix.unsigned_abs() / 8) as usize
    }
}

/// Memory-mapped FITS primary-HDU reader.
pub struct FitsReader {
    mmap: Mmap,
    pub header: FitsHeader,
}

impl std::fmt::Debug for FitsReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitsReader")
            .field("header", &self.header)
            .finish()
    }
}

impl FitsReader {
    /// Open a FITS file and parse its primary header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < BLOCK_SIZE || &mmap[0..6] != b"SIMPLE" {
            return Err(MoresaneError::InvalidFits(
                "Missing SIMPLE primary header".into(),
            ));
        }

        let header = parse_header(&mmap)?;

        let elements: usize = header.axes.iter().product();
        let expected = header.data_offset + elements * header.bytes_per_element();
        if mmap.len() < expected {
            return Err(MoresaneError::InvalidFits(format!(
                "File truncated: expected at least {} bytes, got {}",
                expected,
                mmap.len()
            )));
        }

        Ok(Self { mmap, header })
    }

    /// Read the RA/Dec image plane as a 2D float array.
    ///
    /// For cubes with more than two axes, the world-coordinate axis types
    /// must place RA and Dec on the first two axes; the leading plane of
    /// every remaining axis is selected.
    pub fn read_image(&self) -> Result<Array2<f32>> {
        let axes = &self.header.axes;
        if axes.len() < 2 {
            return Err(MoresaneError::InvalidFits(format!(
                "Expected at least 2 axes, got {}",
                axes.len()
            )));
        }

        if axes.len() > 2 {
            let image_axes = self.header.ctypes.iter().take(2);
            let spatial = image_axes
                .filter(|t| t.starts_with("RA") || t.starts_with("DEC"))
                .count();
            if spatial != 2 {
                return Err(MoresaneError::InvalidFits(
                    "RA/Dec must be the first two axes of the cube".into(),
                ));
            }
        }

        let (w, h) = (axes[0], axes[1]);
        let step = self.header.bytes_per_element();
        let data = &self.mmap[self.header.data_offset..];

        let mut image = Array2::<f32>::zeros((h, w));
        let (bscale, bzero) = (self.header.bscale, self.header.bzero);
        for row in 0..h {
            for col in 0..w {
                let at = (row * w + col) * step;
                let raw = match self.header.bitpix {
                    -32 => BigEndian::read_f32(&data[at..at + 4]) as f64,
                    -64 => BigEndian::read_f64(&data[at..at + 8]),
                    8 => data[at] as f64,
                    16 => BigEndian::read_i16(&data[at..at + 2]) as f64,
                    32 => BigEndian::read_i32(&data[at..at + 4]) as f64,
                    other => {
                        return Err(MoresaneError::InvalidFits(format!(
                            "Unsupported BITPIX {other}"
                        )))
                    }
                };
                image[[row, col]] = (bzero + bscale * raw) as f32;
            }
        }

        Ok(image)
    }
}

fn parse_header(bytes: &[u8]) -> Result<FitsHeader> {
    let mut bitpix: Option<i32> = None;
    let mut naxis: Option<usize> = None;
    let mut axes: Vec<(usize, usize)> = Vec::new();
    let mut ctypes: Vec<(usize, String)> = Vec::new();
    let mut bscale = 1.0f64;
    let mut bzero = 0.0f64;

    let mut offset = 0usize;
    let mut ended = false;
    while !ended {
        if offset + CARD_SIZE > bytes.len() {
            return Err(MoresaneError::InvalidFits("Header missing END card".into()));
        }
        let card = std::str::from_utf8(&bytes[offset..offset + CARD_SIZE])
            .map_err(|_| MoresaneError::InvalidFits("Non-ASCII header card".into()))?;
        offset += CARD_SIZE;

        let keyword = card[..8].trim_end();
        if keyword == "END" {
            ended = true;
            continue;
        }
        let Some(value) = card_value(card) else {
            continue;
        };

        match keyword {
            "BITPIX" => bitpix = Some(parse_int(keyword, value)? as i32),
            "NAXIS" => naxis = Some(parse_int(keyword, value)? as usize),
            "BSCALE" => bscale = parse_float(keyword, value)?,
            "BZERO" => bzero = parse_float(keyword, value)?,
            _ => {
                if let Some(n) = keyword.strip_prefix("NAXIS") {
                    if let Ok(axis) = n.parse::<usize>() {
                        axes.push((axis, parse_int(keyword, value)? as usize));
                    }
                } else if let Some(n) = keyword.strip_prefix("CTYPE") {
                    if let Ok(axis) = n.parse::<usize>() {
                        ctypes.push((axis, string_value(value)));
                    }
                }
            }
        }
    }

    let bitpix = bitpix.ok_or_else(|| MoresaneError::InvalidFits("Missing BITPIX".into()))?;
    let naxis = naxis.ok_or_else(|| MoresaneError::InvalidFits("Missing NAXIS".into()))?;

    let mut axis_sizes = vec![0usize; naxis];
    for (axis, size) in axes {
        if axis == 0 || axis > naxis {
            return Err(MoresaneError::InvalidFits(format!(
                "NAXIS{axis} outside the declared {naxis} axes"
            )));
        }
        axis_sizes[axis - 1] = size;
    }
    if axis_sizes.iter().any(|&s| s == 0) {
        return Err(MoresaneError::InvalidFits("Missing NAXISn card".into()));
    }

    let mut axis_types = vec![String::new(); naxis];
    for (axis, ctype) in ctypes {
        if axis >= 1 && axis <= naxis {
            axis_types[axis - 1] = ctype;
        }
    }

    let data_offset = offset.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

    Ok(FitsHeader {
        bitpix,
        axes: axis_sizes,
        ctypes: axis_types,
        bscale,
        bzero,
        data_offset,
    })
}

/// The value field of a card, without any trailing comment; `None` for
/// cards with no value indicator.
fn card_value(card: &str) -> Option<&str> {
    if card.len() < 10 || &card[8..10] != "= " {
        return None;
    }
    let text = &card[10..];
    // A slash terminates the value unless it is inside a quoted string.
    let mut in_string = false;
    for (i, ch) in text.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '/' if !in_string => return Some(text[..i].trim()),
            _ => {}
        }
    }
    Some(text.trim())
}

fn parse_int(keyword: &str, value: &str) -> Result<i64> {
    value
        .parse::<i64>()
        .map_err(|_| MoresaneError::InvalidFits(format!("Bad integer for {keyword}: {value:?}")))
}

fn parse_float(keyword: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|_| MoresaneError::InvalidFits(format!("Bad float for {keyword}: {value:?}")))
}

fn string_value(value: &str) -> String {
    value.trim().trim_matches('\'').trim().to_string()
}

/// Write a 2D float image as a minimal single-HDU FITS file, with the beam
/// parameters recorded as BMAJ/BMIN/BPA when given.
pub fn write_fits(path: &Path, data: &Array2<f32>, beam: Option<&BeamParams>) -> Result<()> {
    let (h, w) = data.dim();

    let mut header = Vec::with_capacity(BLOCK_SIZE);
    push_card(&mut header, "SIMPLE", "T");
    push_card(&mut header, "BITPIX", "-32");
    push_card(&mut header, "NAXIS", "2");
    push_card(&mut header, "NAXIS1", &w.to_string());
    push_card(&mut header, "NAXIS2", &h.to_string());
    if let Some(beam) = beam {
        push_card(&mut header, "BMAJ", &format!("{:.6E}", beam.bmaj));
        push_card(&mut header, "BMIN", &format!("{:.6E}", beam.bmin));
        push_card(&mut header, "BPA", &format!("{:.6E}", beam.bpa));
    }
    header.extend_from_slice(format!("{:<80}", "END").as_bytes());
    pad_to_block(&mut header);

    let mut payload = Vec::with_capacity(h * w * 4);
    for row in 0..h {
        for col in 0..w {
            payload.write_f32::<BigEndian>(data[[row, col]])?;
        }
    }
    pad_to_block(&mut payload);

    let mut file = File::create(path)?;
    file.write_all(&header)?;
    file.write_all(&payload)?;
    file.flush()?;
    Ok(())
}

fn push_card(header: &mut Vec<u8>, keyword: &str, value: &str) {
    header.extend_from_slice(format!("{keyword:<8}= {value:>20}{:<50}", "").as_bytes());
}

fn pad_to_block(buffer: &mut Vec<u8>) {
    let rem = buffer.len() % BLOCK_SIZE;
    if rem != 0 {
        buffer.resize(buffer.len() + BLOCK_SIZE - rem, 0);
    }
}
