//! RF power conversions, antenna pattern and channel math.
//!
//! Units:
//! - Power: dBm and watts (conversions provided)
//! - Gains and losses: dB (negative values attenuate)
//! - SNR: linear ratio
//!
//! The free-space model assumes dipole-like antennas on both ends of the
//! link, with the elevation angle derived from the flight height over the
//! slant distance.

use std::f64::consts::PI;

/// Convert power from dBm to watts.
pub fn dbm2w(value_dbm: f64) -> f64 {
    10f64.powf(value_dbm / 10.0 - 3.0)
}

/// Convert power from watts to dBm. Vanishing power maps to -inf.
pub fn w2dbm(value_watt: f64) -> f64 {
    if value_watt >= 1e-15 { 10.0 * value_watt.log10() + 30.0 } else { f64::NEG_INFINITY }
}

/// Convert a dB value to a linear ratio.
pub fn db2lin(value_db: f64) -> f64 {
    10f64.powf(value_db / 10.0)
}

/// Convert a linear ratio to dB. Vanishing ratios map to -inf.
pub fn lin2db(value_linear: f64) -> f64 {
    if value_linear >= 1e-15 { 10.0 * value_linear.log10() } else { f64::NEG_INFINITY }
}

/// Signal-to-noise ratio in linear scale from powers in dBm.
pub fn signal2noise(rx_power_dbm: f64, noise_power_dbm: f64) -> f64 {
    db2lin(rx_power_dbm - noise_power_dbm)
}

/// Gaussian tail probability Q(x).
fn q_function(x: f64) -> f64 {
    0.5 - 0.5 * libm::erf(x / std::f64::consts::SQRT_2)
}

/// Bit error rate of BPSK over an additive white gaussian noise channel,
/// given the linear SNR.
pub fn ber_over_awgn(snr: f64) -> f64 {
    let t = q_function(snr.sqrt());
    2.0 * t * (1.0 - t)
}

/// Directional gain of a dipole antenna at the given azimuth.
pub fn dipole_rp(azimuth: f64) -> f64 {
    let c = azimuth.cos();
    let s = azimuth.sin();
    if c > 1e-9 { ((PI / 2.0 * s).cos() / c).abs() } else { 0.0 }
}

/// Free-space attenuation between the reader and a tag, in linear scale.
///
/// `height` is the vertical separation of the antennas; together with the
/// slant `distance` it fixes the elevation angle seen by both dipole
/// patterns.
pub fn free_space_path_loss(distance: f64, height: f64, wavelen: f64) -> f64 {
    let alpha = (height / distance).clamp(-1.0, 1.0).acos();
    let g = dipole_rp(alpha) * dipole_rp(alpha);
    let k = wavelen / (4.0 * PI * distance);
    g * k * k
}
