//! Radio channel state for one reader-tag link.
//!
//! The channel keeps append-only time series of the link geometry and power
//! chain, refreshed on every position update. Protocol handlers read the
//! most recent samples (or interval minima) when deciding whether a frame
//! survived.

use log::Level;

use crate::geometry::Vec3;
use crate::radio::{ber_over_awgn, dbm2w, free_space_path_loss, lin2db, signal2noise, w2dbm};
use crate::sim::reader::Reader;
use crate::sim::tag::Tag;

/// Append-only series of (time, value) samples.
///
/// Lookups scan linearly from the tail: the simulation almost always asks
/// about the most recent samples.
#[derive(Debug, Clone)]
pub struct TimeValueMap {
    times: Vec<f64>,
    values: Vec<f64>,
    default: f64,
}

impl TimeValueMap {
    pub fn new(default: f64) -> Self {
        TimeValueMap { times: Vec::new(), values: Vec::new(), default }
    }

    pub fn record(&mut self, time: f64, value: f64) {
        self.times.push(time);
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Most recently recorded value, or the default on an empty map.
    pub fn last(&self) -> f64 {
        self.values.last().copied().unwrap_or(self.default)
    }

    /// Value of the most recent record at or before `time`, or the default
    /// if nothing was recorded yet at that point.
    pub fn get(&self, time: f64) -> f64 {
        for i in (0..self.times.len()).rev() {
            if self.times[i] <= time {
                return self.values[i];
            }
        }
        self.default
    }

    /// Minimum value over the sample interval whose records bracket
    /// [t0, t1]: the window opens at the last record at or before `t0` and
    /// closes at the last record at or before `t1`.
    pub fn get_min(&self, t0: f64, t1: f64) -> f64 {
        assert!(t0 <= t1, "inverted interval: t0={t0} > t1={t1}");
        let (times, values) = (&self.times, &self.values);

        if times.is_empty() {
            return self.default;
        }
        if t0 >= times[times.len() - 1] {
            return values[values.len() - 1];
        }

        // i1: first index past the last record with time <= t1.
        let mut i1 = 0;
        for i in (0..times.len()).rev() {
            if times[i] <= t1 {
                i1 = i + 1;
                break;
            }
        }

        // i0: last index with time <= t0.
        let mut i0: isize = -1;
        for i in (0..i1).rev() {
            if times[i] <= t0 {
                i0 = i as isize;
                break;
            }
        }
        if i0 < 0 {
            return self.default;
        }

        values[i0 as usize..i1].iter().fold(f64::INFINITY, |acc, &v| acc.min(v))
    }
}

/// Path-loss and bit-error model variant of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelModel {
    /// Step model: a fixed loss within the connection distance, an
    /// effectively infinite loss beyond it, and a configured BER whenever
    /// the link is usable.
    Constant {
        connection_distance: f64,
        path_loss: f64,
        ber: f64,
        noconn_path_loss: f64,
    },
    /// Free-space propagation with dipole patterns and BPSK over AWGN.
    Awgn { frequency: f64 },
}

impl ChannelModel {
    /// Path loss in dB over a slant `distance` with vertical separation
    /// `height`.
    fn path_loss(&self, distance: f64, height: f64, speed_of_light: f64) -> f64 {
        match *self {
            ChannelModel::Constant { connection_distance, path_loss, noconn_path_loss, .. } => {
                if distance <= connection_distance { path_loss } else { noconn_path_loss }
            }
            ChannelModel::Awgn { frequency } => {
                let wavelen = speed_of_light / frequency;
                lin2db(free_space_path_loss(distance, height, wavelen))
            }
        }
    }

    /// Bit error rate for a linear SNR.
    fn ber(&self, snr: f64) -> f64 {
        match *self {
            ChannelModel::Constant { ber, .. } => {
                if snr < 0.5 { 1.0 } else { ber }
            }
            ChannelModel::Awgn { .. } => ber_over_awgn(snr),
        }
    }
}

/// Time-indexed channel state between the reader and one tag.
#[derive(Debug, Clone)]
pub struct Channel {
    pub thermal_noise: f64,
    pub speed_of_light: f64,
    pub model: ChannelModel,

    pub distance_map: TimeValueMap,
    pub dx_map: TimeValueMap,
    pub dy_map: TimeValueMap,
    pub dz_map: TimeValueMap,
    pub path_loss_map: TimeValueMap,
    pub tag_rx_power_map: TimeValueMap,
    pub tag_tx_power_map: TimeValueMap,
    pub reader_rx_power_map: TimeValueMap,
    pub snr_map: TimeValueMap,
    pub ber_map: TimeValueMap,

    // Total receiver noise, combined from thermal and circulator noise on
    // first use.
    reader_noise_dbm: Option<f64>,
}

impl Channel {
    pub fn new(model: ChannelModel, thermal_noise: f64, speed_of_light: f64) -> Self {
        Channel {
            thermal_noise,
            speed_of_light,
            model,
            distance_map: TimeValueMap::new(f64::INFINITY),
            dx_map: TimeValueMap::new(f64::INFINITY),
            dy_map: TimeValueMap::new(f64::INFINITY),
            dz_map: TimeValueMap::new(f64::INFINITY),
            path_loss_map: TimeValueMap::new(f64::NEG_INFINITY),
            tag_rx_power_map: TimeValueMap::new(f64::NEG_INFINITY),
            tag_tx_power_map: TimeValueMap::new(f64::NEG_INFINITY),
            reader_rx_power_map: TimeValueMap::new(f64::NEG_INFINITY),
            snr_map: TimeValueMap::new(0.0),
            ber_map: TimeValueMap::new(1.0),
            reader_noise_dbm: None,
        }
    }

    /// One-way propagation delay between two positions.
    pub fn propagation_delay(&self, a: Vec3, b: Vec3) -> f64 {
        a.distance(b) / self.speed_of_light
    }

    /// Total noise at the reader receiver in dBm, cached after first use.
    pub fn reader_noise_dbm(&mut self, circulator_noise: f64) -> f64 {
        *self.reader_noise_dbm.get_or_insert_with(|| {
            w2dbm(dbm2w(circulator_noise) + dbm2w(self.thermal_noise))
        })
    }

    /// Re-evaluate the geometry and power chain at `time` and append a
    /// sample to every map.
    pub fn update_power(&mut self, time: f64, reader: &Reader, tag: &Tag) {
        let delta = reader.position - tag.position;
        let distance = delta.norm();
        self.distance_map.record(time, distance);
        self.dx_map.record(time, delta.x);
        self.dy_map.record(time, delta.y);
        self.dz_map.record(time, delta.z);

        let pl = self.model.path_loss(distance, delta.z.abs(), self.speed_of_light);
        let tag_rx = reader.tx_power + pl;
        let tag_tx = tag_rx + tag.modulation_loss;
        let reader_rx = tag_tx + pl;

        self.path_loss_map.record(time, pl);
        self.tag_rx_power_map.record(time, tag_rx);
        self.tag_tx_power_map.record(time, tag_tx);
        self.reader_rx_power_map.record(time, reader_rx);

        let noise_dbm = self.reader_noise_dbm(reader.circulator_noise);
        let snr = signal2noise(reader_rx, noise_dbm);
        self.snr_map.record(time, snr);
        self.ber_map.record(time, self.model.ber(snr));
    }

    /// Log the latest link state when the given level is enabled.
    pub fn log_state(&self, level: Level) {
        if log::log_enabled!(level) {
            log::log!(
                level,
                "distance: {:.2} m, tag rx: {:.2} dBm, tag tx: {:.2} dBm, reader rx: {:.2} dBm, snr: {:.2}, ber: {:.6}",
                self.distance_map.last(),
                self.tag_rx_power_map.last(),
                self.tag_tx_power_map.last(),
                self.reader_rx_power_map.last(),
                self.snr_map.last(),
                self.ber_map.last()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: f64 = -110.0;

    fn map_with(records: &[(f64, f64)]) -> TimeValueMap {
        let mut m = TimeValueMap::new(DEFAULT);
        for &(t, v) in records {
            m.record(t, v);
        }
        m
    }

    #[test]
    fn empty_map_returns_default_everywhere() {
        let m = TimeValueMap::new(DEFAULT);
        assert_eq!(m.last(), DEFAULT);
        assert_eq!(m.get(0.0), DEFAULT);
        assert_eq!(m.get(1e9), DEFAULT);
        assert_eq!(m.get_min(0.0, 1.0), DEFAULT);
    }

    #[test]
    fn get_returns_most_recent_at_or_before() {
        let m = map_with(&[(2.0, -10.0), (4.0, -8.0), (6.0, -9.0)]);
        assert_eq!(m.get(1.0), DEFAULT);
        assert_eq!(m.get(2.0), -10.0);
        assert_eq!(m.get(3.9), -10.0);
        assert_eq!(m.get(4.0), -8.0);
        assert_eq!(m.get(100.0), -9.0);
        assert_eq!(m.last(), -9.0);
    }

    #[test]
    fn get_min_from_past_window_is_default() {
        let m = map_with(&[(5.0, -10.0)]);
        assert_eq!(m.get_min(0.0, 1.0), DEFAULT);
    }

    #[test]
    fn get_min_after_last_record_is_last_value() {
        let m = map_with(&[(5.0, -10.0)]);
        assert_eq!(m.get_min(5.0, 7.0), -10.0);
        assert_eq!(m.get_min(9.0, 10.0), -10.0);
    }

    #[test]
    fn get_min_over_bracketing_windows() {
        let m = map_with(&[(2.0, -10.0), (4.0, -8.0), (6.0, -9.0)]);
        assert_eq!(m.get_min(1.0, 3.0), DEFAULT);
        assert_eq!(m.get_min(2.0, 3.0), -10.0);
        assert_eq!(m.get_min(2.1, 3.0), -10.0);
        assert_eq!(m.get_min(3.0, 5.0), -10.0);
        assert_eq!(m.get_min(4.0, 7.0), -9.0);
    }

    #[test]
    fn constant_model_steps_at_connection_distance() {
        let model = ChannelModel::Constant {
            connection_distance: 2.0,
            path_loss: -40.0,
            ber: 0.01,
            noconn_path_loss: -200.0,
        };
        assert_eq!(model.path_loss(1.5, 1.0, 3e8), -40.0);
        assert_eq!(model.path_loss(2.0, 1.0, 3e8), -40.0);
        assert_eq!(model.path_loss(2.1, 1.0, 3e8), -200.0);
        assert_eq!(model.ber(0.4), 1.0);
        assert_eq!(model.ber(0.5), 0.01);
    }

    #[test]
    fn awgn_model_loss_grows_with_distance() {
        let model = ChannelModel::Awgn { frequency: 860e6 };
        let near = model.path_loss(2.0, 1.0, 299792458.0);
        let far = model.path_loss(10.0, 1.0, 299792458.0);
        assert!(near > far);
        assert!(model.ber(100.0) < model.ber(1.0));
    }

    #[test]
    fn reader_noise_is_cached() {
        let model = ChannelModel::Awgn { frequency: 860e6 };
        let mut ch = Channel::new(model, -110.0, 299792458.0);
        let first = ch.reader_noise_dbm(-80.0);
        // Circulator noise dominates thermal noise by 30 dB here.
        assert!((first - (-80.0)).abs() < 0.01);
        // Cached value survives a different argument.
        let second = ch.reader_noise_dbm(-10.0);
        assert_eq!(first, second);
    }

    #[test]
    fn propagation_delay_is_distance_over_c() {
        let model = ChannelModel::Awgn { frequency: 860e6 };
        let ch = Channel::new(model, -110.0, 299792458.0);
        let d = ch.propagation_delay(Vec3::new(0.0, 0.0, 0.0), Vec3::new(299792458.0, 0.0, 0.0));
        assert!((d - 1.0).abs() < 1e-12);
    }
}
