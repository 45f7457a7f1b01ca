//! First coordinate of a polyline-encoded position (precision 5, latitude
//! first), decoded with the `polyline` crate.

/// Failure decoding an encoded position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolylineError {
    #[error("encoding holds no coordinate")]
    Empty,
    #[error("invalid encoding: {0}")]
    Invalid(String),
}

const PRECISION: u32 = 5;

/// Decode the first `(lat, lon)` pair of `encoded`. The whole string must be
/// a valid encoding.
///
/// # Errors
///
/// Returns a [`PolylineError`] when the string is not a valid encoding.
pub fn decode_first(encoded: &str) -> Result<(f64, f64), PolylineError> {
    let line = polyline::decode_polyline(encoded, PRECISION)
        .map_err(|e| PolylineError::Invalid(e.to_string()))?;
    let first = line.0.first().ok_or(PolylineError::Empty)?;
    Ok((first.y, first.x))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn decodes_reference_example() {
        let (lat, lon) = decode_first("_p~iF~ps|U_ulLnnqC").expect("decode");
        assert!(close(lat, 38.5), "lat {lat}");
        assert!(close(lon, -120.2), "lon {lon}");
    }

    #[test]
    fn decodes_published_positions() {
        let (lat, lon) = decode_first("{yrqGb_ylK").expect("decode");
        assert!(close(lat, 44.993_74), "lat {lat}");
        assert!(close(lon, -65.177_62), "lon {lon}");

        let (lat, lon) = decode_first("wchyGv|vmJ").expect("decode");
        assert!(close(lat, 46.249_72), "lat {lat}");
        assert!(close(lon, -60.087_96), "lon {lon}");
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(decode_first(""), Err(PolylineError::Empty));
        assert!(decode_first("_p~iF").is_err());
        assert!(matches!(
            decode_first("_p~i F~ps|U"),
            Err(PolylineError::Invalid(_))
        ));
    }
}
