//! Sensor-line framing for the magnetometer stream
//!
//! One delivery per line, comma-separated floats, x/y/z first. The
//! firmware occasionally glues two decimal numbers together in one field
//! (`50.050.09`), so fields that fail to parse are re-split at the second
//! decimal point before being given up on.

/// Parse one sensor line into its numeric fields.
///
/// Unparseable fragments are dropped rather than failing the frame; a
/// frame with fewer than three usable numbers is discarded entirely, so
/// the engine never sees short readings.
pub fn parse_line(line: &str) -> Option<Vec<f64>> {
    let mut values = Vec::new();
    for part in line.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Ok(value) = part.parse::<f64>() {
            values.push(value);
        } else if let Some((first, second)) = split_glued(part) {
            values.push(first);
            values.push(second);
        }
    }
    if values.len() >= 3 {
        Some(values)
    } else {
        None
    }
}

/// Split a field carrying two glued decimals: the first value runs up to
/// the second decimal point, the second starts at the digit before it.
fn split_glued(part: &str) -> Option<(f64, f64)> {
    let mut dots = part.match_indices('.').map(|(i, _)| i);
    let _first_dot = dots.next()?;
    let second_dot = dots.next()?;
    if second_dot < 1 {
        return None;
    }
    let first = part.get(..second_dot)?.parse::<f64>().ok()?;
    let second = part.get(second_dot - 1..)?.parse::<f64>().ok()?;
    Some((first, second))
}
