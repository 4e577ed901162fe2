//! Spatial coding: morton (Z-order) cells and great-circle distance.
//!
//! Coordinates quantize to 32 bits per axis; interleaving them yields the
//! 64-bit morton code used in geo index keys. Nearby points share code
//! prefixes, so a radius query becomes one contiguous key-range scan at a
//! precision chosen from the radius, refined with the haversine distance.

const EARTH_RADIUS_M: f64 = 6_371_008.8;
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Quantizes and interleaves a coordinate into its morton code.
pub(crate) fn morton_encode(lat: f64, lon: f64) -> u64 {
    let lat_q = quantize(lat, -90.0, 90.0);
    let lon_q = quantize(lon, -180.0, 180.0);
    interleave(lat_q) | (interleave(lon_q) << 1)
}

fn quantize(value: f64, min: f64, max: f64) -> u32 {
    let clamped = value.clamp(min, max);
    let scaled = (clamped - min) / (max - min) * f64::from(u32::MAX);
    scaled as u32
}

/// Spreads the 32 bits of `v` into the even bit positions of a u64.
fn interleave(v: u32) -> u64 {
    let mut x = u64::from(v);
    x = (x | (x << 16)) & 0x0000_FFFF_0000_FFFF;
    x = (x | (x << 8)) & 0x00FF_00FF_00FF_00FF;
    x = (x | (x << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    x = (x | (x << 2)) & 0x3333_3333_3333_3333;
    x = (x | (x << 1)) & 0x5555_5555_5555_5555;
    x
}

/// The contiguous morton range covering a radius around a point.
///
/// Picks the coarsest cell level whose cells are at least as wide as the
/// search box, then spans the corner cells. The range overshoots (Z-order
/// cells between the corners include territory outside the box), so every
/// hit must still be confirmed with [`haversine_m`].
///
/// Returns `None` when the radius is so large the whole index should be
/// scanned instead.
pub(crate) fn covering_range(lat: f64, lon: f64, radius_m: f64) -> Option<(u64, u64)> {
    let dlat = radius_m / METERS_PER_DEGREE;
    let dlon = radius_m / (METERS_PER_DEGREE * lat.to_radians().cos().abs().max(1e-6));

    // Bits per axis such that one cell is wider than the search box.
    let bits_for = |span: f64, extent: f64| -> u32 {
        if span <= 0.0 {
            return 32;
        }
        let cells = extent / (2.0 * span);
        if cells <= 1.0 {
            return 0;
        }
        (cells.log2().floor() as u32).min(32)
    };
    let bits = bits_for(dlat, 180.0).min(bits_for(dlon, 360.0));
    if bits == 0 {
        return None;
    }
    let shift = 64 - 2 * bits;

    let corners = [
        morton_encode(lat - dlat, lon - dlon),
        morton_encode(lat - dlat, lon + dlon),
        morton_encode(lat + dlat, lon - dlon),
        morton_encode(lat + dlat, lon + dlon),
    ];
    let min_cell = corners.iter().map(|c| c >> shift).min().unwrap_or(0);
    let max_cell = corners.iter().map(|c| c >> shift).max().unwrap_or(0);

    let start = min_cell << shift;
    // The end bound can exceed u64 when the box touches the last cell.
    let end = ((u128::from(max_cell) + 1) << shift).min(u128::from(u64::MAX)) as u64;
    Some((start, end))
}

/// Great-circle distance between two coordinates, in meters.
pub(crate) fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_points_share_code_prefixes() {
        let berlin = morton_encode(52.52, 13.405);
        let potsdam = morton_encode(52.39, 13.06);
        let sydney = morton_encode(-33.87, 151.21);
        let near = (berlin ^ potsdam).leading_zeros();
        let far = (berlin ^ sydney).leading_zeros();
        assert!(near > far);
    }

    #[test]
    fn haversine_known_distance() {
        // Berlin to Potsdam is roughly 27 km.
        let d = haversine_m(52.52, 13.405, 52.39, 13.06);
        assert!((20_000.0..35_000.0).contains(&d), "distance {d}");
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_m(10.0, 20.0, 10.0, 20.0) < 1e-6);
    }

    #[test]
    fn covering_range_contains_the_center() {
        let (start, end) = covering_range(52.52, 13.405, 5_000.0).unwrap();
        let center = morton_encode(52.52, 13.405);
        assert!(start <= center && center < end);
    }

    #[test]
    fn covering_range_contains_points_within_radius() {
        let (start, end) = covering_range(52.52, 13.405, 30_000.0).unwrap();
        let potsdam = morton_encode(52.39, 13.06);
        assert!(start <= potsdam && potsdam < end);
    }

    #[test]
    fn planet_sized_radius_means_full_scan() {
        assert!(covering_range(0.0, 0.0, 30_000_000.0).is_none());
    }

    #[test]
    fn poles_and_antimeridian_clamp() {
        // Out-of-range coordinates clamp instead of wrapping.
        let a = morton_encode(95.0, 185.0);
        let b = morton_encode(90.0, 180.0);
        assert_eq!(a, b);
    }
}
