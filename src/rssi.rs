//! RSSI accumulation for the target.
//!
//! Samples are stored either as one flat sequence (legacy scanning) or per
//! primary advertising channel (extended scanning). The first sample fixes
//! the mode; later samples must use the same mode.

use alloc::vec::Vec;
use core::fmt;

use crate::config::ADV_CHANNELS;
use crate::Error;

/// Recorded samples in the mode fixed by the first one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RssiSamples {
    Flat(Vec<i8>),
    /// Indexed by `channel - 37`.
    PerChannel([Vec<i8>; 3]),
}

fn channel_index(channel: u8) -> Result<usize, Error> {
    ADV_CHANNELS
        .iter()
        .position(|&c| c == channel)
        .ok_or(Error::InvalidChannel(channel))
}

impl RssiSamples {
    fn for_channel(channel: Option<u8>) -> Self {
        match channel {
            None => RssiSamples::Flat(Vec::new()),
            Some(_) => RssiSamples::PerChannel([Vec::new(), Vec::new(), Vec::new()]),
        }
    }

    fn record(&mut self, rssi: i8, channel: Option<u8>) -> Result<(), Error> {
        match (self, channel) {
            (RssiSamples::Flat(samples), None) => samples.push(rssi),
            (RssiSamples::PerChannel(channels), Some(ch)) => {
                channels[channel_index(ch)?].push(rssi)
            }
            _ => return Err(Error::ModeMismatch),
        }
        Ok(())
    }

    /// Same mode, no samples.
    pub fn cleared(&self) -> Self {
        match self {
            RssiSamples::Flat(_) => RssiSamples::Flat(Vec::new()),
            RssiSamples::PerChannel(_) => {
                RssiSamples::PerChannel([Vec::new(), Vec::new(), Vec::new()])
            }
        }
    }

    /// Samples received on `channel`; `None` in flat mode or for a
    /// non-primary channel.
    pub fn channel(&self, channel: u8) -> Option<&[i8]> {
        match self {
            RssiSamples::Flat(_) => None,
            RssiSamples::PerChannel(channels) => channel_index(channel)
                .ok()
                .map(|i| channels[i].as_slice()),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &i8> {
        let lists: &[Vec<i8>] = match self {
            RssiSamples::Flat(samples) => core::slice::from_ref(samples),
            RssiSamples::PerChannel(channels) => channels.as_slice(),
        };
        lists.iter().flatten()
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// Count and mean over every channel.
    pub fn stats(&self) -> Result<RssiStats, Error> {
        let count = self.count();
        if count == 0 {
            return Err(Error::NoSamples);
        }
        let sum: i64 = self.iter().map(|&s| i64::from(s)).sum();
        Ok(RssiStats {
            count,
            mean: sum as f64 / count as f64,
        })
    }
}

/// Packet count and mean RSSI (dBm).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RssiStats {
    pub count: usize,
    pub mean: f64,
}

impl fmt::Display for RssiStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} packets, RSSI average {:.1}", self.count, self.mean)
    }
}

/// Per-target accumulator. Empty until the first sample fixes its mode.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RssiAccumulator {
    samples: Option<RssiSamples>,
}

impl RssiAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. `channel` is `Some` for extended scan reports.
    pub fn record(&mut self, rssi: i8, channel: Option<u8>) -> Result<(), Error> {
        if let Some(ch) = channel {
            channel_index(ch)?;
        }
        self.samples
            .get_or_insert_with(|| RssiSamples::for_channel(channel))
            .record(rssi, channel)
    }

    pub fn stats(&self) -> Result<RssiStats, Error> {
        self.samples.as_ref().ok_or(Error::NoSamples)?.stats()
    }

    /// Drop all samples, keeping the mode.
    pub fn reset(&mut self) -> Result<(), Error> {
        let samples = self.samples.as_mut().ok_or(Error::NoRssiMode)?;
        *samples = samples.cleared();
        Ok(())
    }

    pub fn samples(&self) -> Option<&RssiSamples> {
        self.samples.as_ref()
    }

    pub fn count(&self) -> usize {
        self.samples.as_ref().map_or(0, RssiSamples::count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_stats() {
        let mut acc = RssiAccumulator::new();
        for rssi in [-60, -62, -64, -70] {
            acc.record(rssi, None).unwrap();
        }
        let stats = acc.stats().unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, -64.0);
    }

    #[test]
    fn per_channel_stats_span_all_channels() {
        let mut acc = RssiAccumulator::new();
        acc.record(-50, Some(37)).unwrap();
        acc.record(-60, Some(38)).unwrap();
        acc.record(-70, Some(39)).unwrap();
        acc.record(-41, Some(39)).unwrap();

        let samples = acc.samples().unwrap();
        assert_eq!(samples.channel(39), Some(&[-70, -41][..]));
        assert_eq!(samples.channel(36), None);
        let stats = acc.stats().unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, -55.25);
    }

    #[test]
    fn mode_cannot_change() {
        let mut flat = RssiAccumulator::new();
        flat.record(-50, None).unwrap();
        assert_eq!(flat.record(-50, Some(37)), Err(Error::ModeMismatch));

        let mut per_channel = RssiAccumulator::new();
        per_channel.record(-50, Some(37)).unwrap();
        assert_eq!(per_channel.record(-50, None), Err(Error::ModeMismatch));
        assert_eq!(per_channel.count(), 1);
    }

    #[test]
    fn non_primary_channel_is_rejected() {
        let mut acc = RssiAccumulator::new();
        acc.record(-50, Some(38)).unwrap();
        assert_eq!(acc.record(-50, Some(12)), Err(Error::InvalidChannel(12)));
    }

    #[test]
    fn rejected_first_sample_leaves_mode_open() {
        let mut acc = RssiAccumulator::new();
        assert_eq!(acc.record(-50, Some(12)), Err(Error::InvalidChannel(12)));
        assert_eq!(acc.samples(), None);
        assert_eq!(acc.reset(), Err(Error::NoRssiMode));

        acc.record(-50, None).unwrap();
        assert!(matches!(acc.samples(), Some(RssiSamples::Flat(_))));
    }

    #[test]
    fn reset_keeps_mode() {
        let mut acc = RssiAccumulator::new();
        acc.record(-50, Some(37)).unwrap();
        acc.reset().unwrap();
        assert_eq!(acc.count(), 0);
        assert!(matches!(acc.samples(), Some(RssiSamples::PerChannel(_))));
        assert_eq!(acc.record(-50, None), Err(Error::ModeMismatch));
    }

    #[test]
    fn reset_without_mode_fails() {
        let mut acc = RssiAccumulator::new();
        assert_eq!(acc.reset(), Err(Error::NoRssiMode));
    }

    #[test]
    fn stats_over_nothing_fails() {
        let mut acc = RssiAccumulator::new();
        assert_eq!(acc.stats(), Err(Error::NoSamples));
        acc.record(-50, None).unwrap();
        acc.reset().unwrap();
        assert_eq!(acc.stats(), Err(Error::NoSamples));
    }

    #[test]
    fn stats_display() {
        let stats = RssiStats {
            count: 42,
            mean: -61.34,
        };
        assert_eq!(stats.to_string(), "42 packets, RSSI average -61.3");
    }
}
