use image::Rgb;

use crate::errors::{Result, SegEvalError};

/// The PASCAL VOC colour map: the bits of each class id are spread over the high bits of the
/// three channels, so neighbouring ids get clearly different colours and id 0 is black.
pub fn voc_palette(len: usize) -> Vec<Rgb<u8>> {
    (0..len)
        .map(|id| {
            let mut rgb = [0u8; 3];
            let mut bits = id;
            for shift in (0..8).rev() {
                for (channel, value) in rgb.iter_mut().enumerate() {
                    *value |= (((bits >> channel) & 1) as u8) << shift;
                }
                bits >>= 3;
            }
            Rgb(rgb)
        })
        .collect()
}

/// Parses one `r,g,b` triple per line. Blank lines and `#` comments are skipped.
pub fn parse_palette(text: &str) -> Result<Vec<Rgb<u8>>> {
    let mut palette = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let channels = line
            .split(',')
            .map(|c| c.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SegEvalError::InvalidPalette {
                reason: format!("line {}: {}", line_no + 1, e),
            })?;

        let [r, g, b] = channels[..] else {
            return Err(SegEvalError::InvalidPalette {
                reason: format!(
                    "line {}: expected 3 channels, got {}",
                    line_no + 1,
                    channels.len()
                ),
            });
        };
        palette.push(Rgb([r, g, b]));
    }

    if palette.is_empty() {
        return Err(SegEvalError::InvalidPalette {
            reason: "no colors found".to_string(),
        });
    }
    Ok(palette)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voc_palette_known_entries() {
        let palette = voc_palette(21);
        assert_eq!(palette.len(), 21);
        assert_eq!(palette[0], Rgb([0, 0, 0]));
        assert_eq!(palette[1], Rgb([128, 0, 0]));
        assert_eq!(palette[2], Rgb([0, 128, 0]));
        assert_eq!(palette[3], Rgb([128, 128, 0]));
        assert_eq!(palette[15], Rgb([192, 128, 128]));
    }

    #[test]
    fn test_voc_palette_is_distinct() {
        let palette = voc_palette(256);
        for (i, a) in palette.iter().enumerate() {
            for b in &palette[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_parse_palette() -> Result<()> {
        let palette = parse_palette("# road, sky\n0,0,0\n\n 70, 130 ,180\n")?;
        assert_eq!(palette, vec![Rgb([0, 0, 0]), Rgb([70, 130, 180])]);
        Ok(())
    }

    #[test]
    fn test_parse_palette_rejects_bad_lines() {
        assert!(parse_palette("1,2\n").is_err());
        assert!(parse_palette("1,2,300\n").is_err());
        assert!(parse_palette("# only a comment\n").is_err());
    }
}
