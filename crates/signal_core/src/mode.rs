use crate::Mode;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Time-of-day bands, inclusive start and exclusive end, in seconds of day.
const MODE_BANDS: [(f64, f64, Mode); 5] = [
    (0.0, 21_600.0, Mode::Off),
    (21_600.0, 39_600.0, Mode::Peak),
    (39_600.0, 57_600.0, Mode::Inter),
    (57_600.0, 72_000.0, Mode::Peak),
    (72_000.0, SECONDS_PER_DAY, Mode::Off),
];

/// Operating mode for a simulation time in seconds.
///
/// Times wrap at midnight. Anything that falls outside every band (only
/// possible for non-finite input) runs the inter-peak plan.
pub fn mode_at(sim_time_s: f64) -> Mode {
    let time_of_day = sim_time_s.rem_euclid(SECONDS_PER_DAY);
    MODE_BANDS
        .iter()
        .find(|(start, end, _)| time_of_day >= *start && time_of_day < *end)
        .map_or(Mode::Inter, |(_, _, mode)| *mode)
}
