//! The `params` module implements [`ParameterSet`] and [`ParameterStore`]: named, typed
//! bundles of decoding tunables with per-format compiled defaults, optionally overlaid from a
//! user-supplied configuration file.
//!
//! Parameters are looked up by name into a flat struct rather than by member offset:
//! [`FIELD_SPECS`] maps a parameter's name to a bounds-checked setter.

use serde::Deserialize;

use crate::errors::{param_file_error, Result};
use crate::units::Format;

/// One named bundle of decoding tunables.
#[derive(Clone, Debug)]
pub struct ParameterSet {
    pub name: String,
    pub active: bool,
    /// Moving-window size for [`crate::clock::ClockAverager`]; 0 selects exponential smoothing.
    pub clk_window: u32,
    pub clk_alpha: f64,
    pub agc_window: u32,
    pub agc_alpha: f64,
    /// Absolute voltage floor a peak must clear, in addition to the relative prominence test.
    pub min_peak: Option<f64>,
    /// PE only: scales the clock-window half-bitspace when deciding if an edge was missed.
    pub clk_factor: f64,
    pub pulse_adj: f64,
    /// Peak-detection window width, as a fraction of one bit cell.
    pub pkww_bitfrac: f64,
    /// Required peak prominence, before AGC/amplitude scaling.
    pub pkww_rise: f64,
    /// NRZI only: midbit scheduling fraction.
    pub midbit: f64,
    /// GCR only: zero-bit thresholds, as multiples of the bit spacing.
    pub z1pt: f64,
    pub z2pt: f64,
}

impl ParameterSet {
    fn agc_is_window(&self) -> bool {
        self.agc_window > 0
    }
}

/// A named, bounds-checked parameter slot. `set` commits a value into a [`ParameterSet`] after
/// `get_field` validates it fell within `[min, max]`.
struct FieldSpec {
    name: &'static str,
    min: f64,
    max: f64,
    set: fn(&mut ParameterSet, f64),
}

const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec { name: "clk_window", min: 0.0, max: 32.0, set: |p, v| p.clk_window = v as u32 },
    FieldSpec { name: "clk_alpha", min: 0.0, max: 1.0, set: |p, v| p.clk_alpha = v },
    FieldSpec { name: "agc_window", min: 0.0, max: 32.0, set: |p, v| p.agc_window = v as u32 },
    FieldSpec { name: "agc_alpha", min: 0.0, max: 1.0, set: |p, v| p.agc_alpha = v },
    FieldSpec { name: "min_peak", min: 0.0, max: 10.0, set: |p, v| p.min_peak = Some(v) },
    FieldSpec { name: "clk_factor", min: 0.1, max: 4.0, set: |p, v| p.clk_factor = v },
    FieldSpec { name: "pulse_adj", min: 0.0, max: 1.0, set: |p, v| p.pulse_adj = v },
    FieldSpec { name: "pkww_bitfrac", min: 0.05, max: 1.0, set: |p, v| p.pkww_bitfrac = v },
    FieldSpec { name: "pkww_rise", min: 0.0, max: 1.0, set: |p, v| p.pkww_rise = v },
    FieldSpec { name: "midbit", min: 0.0, max: 1.0, set: |p, v| p.midbit = v },
    FieldSpec { name: "z1pt", min: 0.1, max: 4.0, set: |p, v| p.z1pt = v },
    FieldSpec { name: "z2pt", min: 0.1, max: 4.0, set: |p, v| p.z2pt = v },
];

fn apply_named_field(set: &mut ParameterSet, name: &str, value: f64) -> Result<()> {
    match FIELD_SPECS.iter().find(|spec| spec.name == name) {
        Some(spec) => {
            if value < spec.min || value > spec.max {
                return param_file_error(format!(
                    "parameter '{name}' = {value} is out of range [{}, {}]",
                    spec.min, spec.max
                ));
            }
            (spec.set)(set, value);
            Ok(())
        }
        None => {
            log::warn!("parameter file: ignoring unrecognized/obsolete parameter name '{name}'");
            Ok(())
        }
    }
}

/// The on-disk shape of an overlay file: `[[parmset]]` tables, each a bag of named values.
#[derive(Deserialize)]
struct ParamFile {
    #[serde(rename = "parmset", default)]
    parmsets: Vec<toml::value::Table>,
}

/// Holds an ordered list of parameter sets for one format, one of which is `active`.
#[derive(Debug)]
pub struct ParameterStore {
    sets: Vec<ParameterSet>,
}

impl ParameterStore {
    /// Compiled-in defaults for `format`. Every format gets the same tuning as a reasonable
    /// first set; alternate sets loosen the clock/AGC responsiveness so `BlockOrchestrator` has
    /// something different to try on retry.
    pub fn with_defaults(format: Format) -> Self {
        let base = match format {
            Format::Pe => ParameterSet {
                name: "pe-default".into(),
                active: true,
                clk_window: 0,
                clk_alpha: 0.5,
                agc_window: 0,
                agc_alpha: 0.5,
                min_peak: None,
                clk_factor: 1.0,
                pulse_adj: 0.5,
                pkww_bitfrac: 0.4,
                pkww_rise: 0.2,
                midbit: 0.0,
                z1pt: 0.0,
                z2pt: 0.0,
            },
            Format::Nrzi => ParameterSet {
                name: "nrzi-default".into(),
                active: true,
                clk_window: 3,
                clk_alpha: 0.0,
                agc_window: 3,
                agc_alpha: 0.0,
                min_peak: None,
                clk_factor: 1.0,
                pulse_adj: 0.5,
                pkww_bitfrac: 0.5,
                pkww_rise: 0.2,
                midbit: 0.3,
                z1pt: 0.0,
                z2pt: 0.0,
            },
            Format::Gcr => ParameterSet {
                name: "gcr-default".into(),
                active: true,
                clk_window: 3,
                clk_alpha: 0.0,
                agc_window: 0,
                agc_alpha: 0.5,
                min_peak: None,
                clk_factor: 1.0,
                pulse_adj: 0.5,
                pkww_bitfrac: 0.35,
                pkww_rise: 0.2,
                midbit: 0.0,
                z1pt: 1.5,
                z2pt: 2.5,
            },
        };

        // Retry variants, tried in order when the base set doesn't produce a clean decode.
        // `clk_window=3, pulse_adj=0` ("tight") is the one a block built only for a narrow,
        // unadjusted clock window needs -- see the multi-try recovery scenario in spec §8.
        let variants: [(&str, u32, f64, f64); 3] =
            [("alt", 0, 0.25, 0.0), ("wide", 5, 0.0, 0.25), ("tight", 3, 0.0, 0.0)];

        let mut sets = vec![base.clone()];
        for (suffix, clk_window, clk_alpha, pulse_adj) in variants {
            let mut set = base.clone();
            set.name = format!("{}-{suffix}", base.name);
            set.active = false;
            set.clk_window = clk_window;
            set.clk_alpha = clk_alpha;
            set.pulse_adj = pulse_adj;
            sets.push(set);
        }

        ParameterStore { sets }
    }

    pub fn sets(&self) -> &[ParameterSet] {
        &self.sets
    }

    pub fn active_index(&self) -> usize {
        self.sets.iter().position(|set| set.active).unwrap_or(0)
    }

    pub fn active(&self) -> &ParameterSet {
        &self.sets[self.active_index()]
    }

    /// The next parameter set not already present in `tried`, if any.
    pub fn next_unused(&self, tried: &[usize]) -> Option<usize> {
        (0..self.sets.len()).find(|idx| !tried.contains(idx))
    }

    /// Overlays a textual configuration. Each `[[parmset]]` table names its parameters by key;
    /// if the table's `name` matches an existing set, that set's fields are overlaid in place,
    /// otherwise a new set is appended inheriting from `sets[0]`.
    pub fn overlay_from_toml(&mut self, text: &str) -> Result<()> {
        let file: ParamFile = toml::from_str(text).map_err(|e| match param_file_error::<()>(e.to_string()) {
            Err(err) => err,
            Ok(()) => unreachable!(),
        })?;

        for table in file.parmsets {
            let name = table.get("name").and_then(|v| v.as_str()).map(str::to_owned);

            let mut set = match &name {
                Some(existing_name) => match self.sets.iter().position(|s| &s.name == existing_name) {
                    Some(idx) => self.sets[idx].clone(),
                    None => self.sets[0].clone(),
                },
                None => self.sets[0].clone(),
            };

            if let Some(name) = name {
                set.name = name;
            }

            for (key, value) in &table {
                if key == "name" || key == "active" {
                    continue;
                }
                let value = match value.as_float().or_else(|| value.as_integer().map(|i| i as f64)) {
                    Some(v) => v,
                    None => {
                        log::warn!("parameter file: value for '{key}' is not numeric, ignoring");
                        continue;
                    }
                };
                apply_named_field(&mut set, key, value)?;
            }

            match self.sets.iter().position(|s| s.name == set.name) {
                Some(idx) => self.sets[idx] = set,
                None => self.sets.push(set),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_one_active_set() {
        let store = ParameterStore::with_defaults(Format::Nrzi);
        assert_eq!(store.sets().iter().filter(|s| s.active).count(), 1);
    }

    #[test]
    fn overlay_updates_named_field() {
        let mut store = ParameterStore::with_defaults(Format::Pe);
        let toml_text = r#"
            [[parmset]]
            name = "pe-default"
            pulse_adj = 0.75
        "#;
        store.overlay_from_toml(toml_text).unwrap();
        assert_eq!(store.active().pulse_adj, 0.75);
    }

    #[test]
    fn overlay_rejects_out_of_range_value() {
        let mut store = ParameterStore::with_defaults(Format::Pe);
        let toml_text = r#"
            [[parmset]]
            name = "pe-default"
            clk_alpha = 5.0
        "#;
        assert!(store.overlay_from_toml(toml_text).is_err());
    }

    #[test]
    fn overlay_ignores_unrecognized_name() {
        let mut store = ParameterStore::with_defaults(Format::Pe);
        let toml_text = r#"
            [[parmset]]
            name = "pe-default"
            some_removed_knob = 1.0
        "#;
        assert!(store.overlay_from_toml(toml_text).is_ok());
    }

    #[test]
    fn next_unused_skips_tried_indices() {
        let store = ParameterStore::with_defaults(Format::Gcr);
        assert_eq!(store.next_unused(&[0]), Some(1));
        assert_eq!(store.next_unused(&[0, 1, 2, 3]), None);
    }

    #[test]
    fn four_compiled_in_sets_include_the_tight_retry_variant() {
        let store = ParameterStore::with_defaults(Format::Pe);
        assert_eq!(store.sets().len(), 4);
        let tight = &store.sets()[3];
        assert_eq!(tight.clk_window, 3);
        assert_eq!(tight.pulse_adj, 0.0);
    }

    #[test]
    fn agc_is_window_reflects_window_field() {
        let store = ParameterStore::with_defaults(Format::Nrzi);
        assert!(store.active().agc_is_window());
    }
}
