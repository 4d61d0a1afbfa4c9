//! The `sample` module defines the unit of input the core consumes and the track-ordering
//! permutation applied to it.

use crate::errors::{track_order_error, Result};
use crate::units::{Seconds, TrackRole, Volts};

/// One synchronous reading of every head channel at a single instant.
///
/// Produced externally by the caller's sample source; immutable as seen by the core.
#[derive(Clone, Debug)]
pub struct Sample {
    pub time: Seconds,
    pub voltage: Vec<Volts>,
}

impl Sample {
    pub fn new(time: Seconds, voltage: Vec<Volts>) -> Self {
        Sample { time, voltage }
    }

    pub fn ntrks(&self) -> usize {
        self.voltage.len()
    }
}

/// Maps input channel index to logical track role, and back.
///
/// Default for 9-track is `0,1,2,3,4,5,6,7,P` (parity last); for 7-track it is `0,1,2,3,4,5,P`.
/// The user may supply any permutation of `0..ntrks-1` with one slot marked `P`.
#[derive(Clone, Debug)]
pub struct TrackOrder {
    /// `roles[channel]` is the logical role carried by input channel `channel`.
    roles: Vec<TrackRole>,
    parity_channel: usize,
}

impl TrackOrder {
    /// The default order for a 9-track or 7-track head: data tracks in ascending order, parity
    /// last.
    pub fn default_for(ntrks: usize) -> Self {
        let mut roles: Vec<TrackRole> = (0..ntrks as u8 - 1).map(TrackRole::Data).collect();
        roles.push(TrackRole::Parity);
        TrackOrder { roles, parity_channel: ntrks - 1 }
    }

    /// Builds a track order from an explicit permutation, e.g. `["0","1","2","3","4","5","6","7","P"]`.
    pub fn from_labels(labels: &[&str]) -> Result<Self> {
        let ntrks = labels.len();
        let mut seen_data = vec![false; ntrks];
        let mut parity_channel = None;
        let mut roles = Vec::with_capacity(ntrks);

        for (channel, label) in labels.iter().enumerate() {
            if label.eq_ignore_ascii_case("p") {
                if parity_channel.is_some() {
                    return track_order_error("more than one parity channel named");
                }
                parity_channel = Some(channel);
                roles.push(TrackRole::Parity);
            }
            else {
                let track: usize = match label.parse() {
                    Ok(track) => track,
                    Err(_) => return track_order_error(format!("unrecognized track label '{label}'")),
                };

                if track >= ntrks - 1 || seen_data[track] {
                    return track_order_error(format!("track label '{label}' is out of range or repeated"));
                }
                seen_data[track] = true;
                roles.push(TrackRole::Data(track as u8));
            }
        }

        let parity_channel = match parity_channel {
            Some(c) => c,
            None => return track_order_error("track order is missing a parity channel"),
        };

        if seen_data.iter().any(|seen| !seen) {
            return track_order_error("track order does not name every data track exactly once");
        }

        Ok(TrackOrder { roles, parity_channel })
    }

    pub fn ntrks(&self) -> usize {
        self.roles.len()
    }

    pub fn role(&self, channel: usize) -> TrackRole {
        self.roles[channel]
    }

    pub fn parity_channel(&self) -> usize {
        self.parity_channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_nine_track_puts_parity_last() {
        let order = TrackOrder::default_for(9);
        assert_eq!(order.parity_channel(), 8);
        assert_eq!(order.role(0), TrackRole::Data(0));
        assert_eq!(order.role(8), TrackRole::Parity);
    }

    #[test]
    fn explicit_order_accepts_any_permutation() {
        let labels = ["P", "0", "1", "2", "3", "4", "5", "6", "7"];
        let order = TrackOrder::from_labels(&labels).unwrap();
        assert_eq!(order.parity_channel(), 0);
        assert_eq!(order.role(1), TrackRole::Data(0));
    }

    #[test]
    fn rejects_missing_parity() {
        let labels = ["0", "1", "2", "3", "4", "5"];
        assert!(TrackOrder::from_labels(&labels).is_err());
    }

    #[test]
    fn rejects_duplicate_track() {
        let labels = ["0", "0", "1", "2", "3", "P"];
        assert!(TrackOrder::from_labels(&labels).is_err());
    }
}
