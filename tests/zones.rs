use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use zone_discipline::zones::{PITCH_LENGTH, PITCH_WIDTH, ZoneGrid};

fn inside(grid: &ZoneGrid, id: usize, x: f64, y: f64) -> bool {
    let z = grid.zone(id).unwrap();
    let last_x = z.x_bin + 1 == grid.x_bins;
    let last_y = z.y_bin + 1 == grid.y_bins;
    let in_x = x >= z.x_min && (x < z.x_max || (last_x && x <= z.x_max));
    let in_y = y >= z.y_min && (y < z.y_max || (last_y && y <= z.y_max));
    in_x && in_y
}

#[test]
fn every_on_pitch_point_lands_in_exactly_one_zone() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for grid in [ZoneGrid::default(), ZoneGrid::new(6, 4), ZoneGrid::new(1, 1)] {
        for _ in 0..5_000 {
            let x = rng.gen_range(0.0..=PITCH_LENGTH);
            let y = rng.gen_range(0.0..=PITCH_WIDTH);
            let id = grid.zone_of(x, y);
            let containing = (0..grid.zone_count())
                .filter(|z| inside(&grid, *z, x, y))
                .count();
            assert_eq!(containing, 1, "({x}, {y}) on {grid:?}");
            assert!(inside(&grid, id, x, y));
        }
    }
}

#[test]
fn edges_belong_to_the_upper_bin_except_the_pitch_boundary() {
    let grid = ZoneGrid::default();
    // 24 is the first interior x edge, 80/3 the first interior y edge.
    assert_eq!(grid.zone_of(24.0, 0.0), grid.zone_id(1, 0));
    assert_eq!(grid.zone_of(23.999, 0.0), grid.zone_id(0, 0));
    assert_eq!(grid.zone_of(0.0, PITCH_WIDTH / 3.0), grid.zone_id(0, 1));
    assert_eq!(grid.zone_of(PITCH_LENGTH, PITCH_WIDTH), grid.zone_count() - 1);
    assert_eq!(grid.zone_of(0.0, 0.0), 0);
}

#[test]
fn off_pitch_points_are_clamped() {
    let grid = ZoneGrid::default();
    assert_eq!(grid.zone_of(-5.0, -1.0), 0);
    assert_eq!(grid.zone_of(130.0, 95.0), grid.zone_count() - 1);
    assert_eq!(grid.zone_of(f64::NAN, 40.0), grid.zone_id(0, 1));
}

#[test]
fn default_grid_labels_and_context() {
    let grid = ZoneGrid::default();
    let zones = grid.zones();
    assert_eq!(zones.len(), 15);
    assert_eq!(zones[7].label(), "x2_y1");
    assert_eq!(zones[7].description(), "middle third, central channel");
    assert_eq!(zones[0].description(), "defensive third, left channel");
    assert_eq!(zones[14].description(), "attacking third, right channel");
    let area: f64 = zones
        .iter()
        .map(|z| (z.x_max - z.x_min) * (z.y_max - z.y_min))
        .sum();
    assert!((area - PITCH_LENGTH * PITCH_WIDTH).abs() < 1e-9);
}
