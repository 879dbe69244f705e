//! Effect parameters over the graph nodes
//!
//! Settings are kept here as well as pushed to the nodes, so they survive a
//! dispose/initialize cycle and can be changed before the graph exists.

use super::backend::{volume_to_db, AudioBackend, EqBand, Param};
use super::graph::AudioGraph;
use crate::config::EngineConfig;
use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const EQ_GAIN_RANGE_DB: f32 = 12.0;

/// Narrowest stereo image we will ever ask for; 0 would collapse to mono
pub const MIN_STEREO_WIDTH: f32 = 0.1;
pub const MAX_STEREO_WIDTH: f32 = 1.0;

/// Compressor threshold when disengaged: nothing reaches it
pub const BYPASS_THRESHOLD_DB: f32 = 0.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSettings {
    pub eq_low_db: f32,
    pub eq_mid_db: f32,
    pub eq_high_db: f32,
    pub compressor_active: bool,
    pub stereo_width: f32,
    pub volume: f32,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            eq_low_db: 0.0,
            eq_mid_db: 0.0,
            eq_high_db: 0.0,
            compressor_active: true,
            stereo_width: 0.5,
            volume: 1.0,
        }
    }
}

impl EffectSettings {
    pub fn eq_gain(&self, band: EqBand) -> f32 {
        match band {
            EqBand::Low => self.eq_low_db,
            EqBand::Mid => self.eq_mid_db,
            EqBand::High => self.eq_high_db,
        }
    }

    fn eq_gain_mut(&mut self, band: EqBand) -> &mut f32 {
        match band {
            EqBand::Low => &mut self.eq_low_db,
            EqBand::Mid => &mut self.eq_mid_db,
            EqBand::High => &mut self.eq_high_db,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EffectsController {
    settings: EffectSettings,
    active_threshold_db: f32,
    wide_width: f32,
    neutral_width: f32,
}

impl EffectsController {
    pub fn new(config: &EngineConfig) -> Self {
        let neutral_width = config.neutral_width.clamp(MIN_STEREO_WIDTH, MAX_STEREO_WIDTH);
        Self {
            settings: EffectSettings {
                stereo_width: neutral_width,
                ..EffectSettings::default()
            },
            active_threshold_db: config.compressor_threshold_db,
            wide_width: config.wide_width.clamp(MIN_STEREO_WIDTH, MAX_STEREO_WIDTH),
            neutral_width,
        }
    }

    pub fn settings(&self) -> &EffectSettings {
        &self.settings
    }

    /// Set an EQ band gain in dB, clamped to ±12. Non-finite input is ignored.
    pub fn set_eq_band<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        band: EqBand,
        gain_db: f32,
    ) -> Result<(), GraphError> {
        if !gain_db.is_finite() {
            debug!("ignoring non-finite EQ gain for {:?}", band);
            return Ok(());
        }
        let gain_db = gain_db.clamp(-EQ_GAIN_RANGE_DB, EQ_GAIN_RANGE_DB);
        *self.settings.eq_gain_mut(band) = gain_db;
        push(graph, |n| n.eq, Param::EqGain(band, gain_db))
    }

    pub fn toggle_compressor<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        active: bool,
    ) -> Result<(), GraphError> {
        self.settings.compressor_active = active;
        push(graph, |n| n.compressor, Param::Threshold(self.threshold_db()))
    }

    pub fn toggle_3d<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        active: bool,
    ) -> Result<(), GraphError> {
        let width = if active { self.wide_width } else { self.neutral_width };
        self.set_stereo_width(graph, width)
    }

    /// Set the widener, held inside [MIN_STEREO_WIDTH, MAX_STEREO_WIDTH]
    pub fn set_stereo_width<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        width: f32,
    ) -> Result<(), GraphError> {
        let width = if width.is_finite() {
            width.clamp(MIN_STEREO_WIDTH, MAX_STEREO_WIDTH)
        } else {
            self.neutral_width
        };
        self.settings.stereo_width = width;
        push(graph, |n| n.widener, Param::Width(width))
    }

    /// Linear volume 0..=1 on the player
    pub fn set_volume<B: AudioBackend>(
        &mut self,
        graph: &mut AudioGraph<B>,
        volume: f32,
    ) -> Result<(), GraphError> {
        let volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
        self.settings.volume = volume;
        push(graph, |n| n.player, Param::VolumeDb(volume_to_db(volume)))
    }

    /// Push every stored setting to a freshly built graph
    pub fn apply_all<B: AudioBackend>(&self, graph: &mut AudioGraph<B>) -> Result<(), GraphError> {
        for band in EqBand::ALL {
            graph.set_param(|n| n.eq, Param::EqGain(band, self.settings.eq_gain(band)))?;
        }
        graph.set_param(|n| n.compressor, Param::Threshold(self.threshold_db()))?;
        graph.set_param(|n| n.widener, Param::Width(self.settings.stereo_width))?;
        graph.set_param(|n| n.player, Param::VolumeDb(volume_to_db(self.settings.volume)))?;
        Ok(())
    }

    fn threshold_db(&self) -> f32 {
        if self.settings.compressor_active {
            self.active_threshold_db
        } else {
            BYPASS_THRESHOLD_DB
        }
    }
}

/// Settings changes before the graph exists are kept and applied later
fn push<B: AudioBackend>(
    graph: &mut AudioGraph<B>,
    pick: impl FnOnce(&super::graph::GraphNodes) -> super::backend::NodeId,
    param: Param,
) -> Result<(), GraphError> {
    if !graph.is_ready() {
        return Ok(());
    }
    graph.set_param(pick, param)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{NodeSpec, NullBackend, NullProbe};

    fn setup() -> (AudioGraph<NullBackend>, EffectsController, NullProbe) {
        let backend = NullBackend::new(100);
        let probe = backend.probe();
        let config = EngineConfig::default();
        let mut graph = AudioGraph::new(backend, config.clone());
        graph.initialize().unwrap();
        (graph, EffectsController::new(&config), probe)
    }

    fn width(graph: &AudioGraph<NullBackend>, probe: &NullProbe) -> f32 {
        match probe.spec(graph.nodes().unwrap().widener) {
            Some(NodeSpec::StereoWidener { width }) => width,
            other => panic!("unexpected widener state {:?}", other),
        }
    }

    #[test]
    fn test_toggle_3d_never_reaches_mono() {
        let (mut graph, mut fx, probe) = setup();
        fx.toggle_3d(&mut graph, true).unwrap();
        assert_eq!(width(&graph, &probe), 0.8);

        fx.toggle_3d(&mut graph, false).unwrap();
        assert_eq!(width(&graph, &probe), 0.5);

        fx.set_stereo_width(&mut graph, 0.0).unwrap();
        assert_eq!(width(&graph, &probe), MIN_STEREO_WIDTH);
        fx.set_stereo_width(&mut graph, f32::NAN).unwrap();
        assert_eq!(width(&graph, &probe), 0.5);
    }

    #[test]
    fn test_compressor_thresholds() {
        let (mut graph, mut fx, probe) = setup();
        let compressor = graph.nodes().unwrap().compressor;

        fx.toggle_compressor(&mut graph, false).unwrap();
        assert_eq!(
            probe.spec(compressor),
            Some(NodeSpec::Compressor { threshold_db: 0.0, ratio: 3.0 })
        );

        fx.toggle_compressor(&mut graph, true).unwrap();
        assert_eq!(
            probe.spec(compressor),
            Some(NodeSpec::Compressor { threshold_db: -30.0, ratio: 3.0 })
        );
    }

    #[test]
    fn test_eq_gain_is_clamped() {
        let (mut graph, mut fx, probe) = setup();
        fx.set_eq_band(&mut graph, EqBand::Low, 20.0).unwrap();
        fx.set_eq_band(&mut graph, EqBand::High, -3.5).unwrap();
        fx.set_eq_band(&mut graph, EqBand::Mid, f32::INFINITY).unwrap();

        assert_eq!(
            probe.spec(graph.nodes().unwrap().eq),
            Some(NodeSpec::Eq3 { low: 12.0, mid: 0.0, high: -3.5 })
        );
    }

    #[test]
    fn test_settings_survive_reinitialize() {
        let (mut graph, mut fx, probe) = setup();
        graph.dispose();

        // changed while there is no graph
        fx.set_eq_band(&mut graph, EqBand::Mid, 4.0).unwrap();
        fx.toggle_3d(&mut graph, true).unwrap();
        fx.set_volume(&mut graph, 0.0).unwrap();

        graph.initialize().unwrap();
        fx.apply_all(&mut graph).unwrap();
        let nodes = graph.nodes().unwrap();
        assert_eq!(
            probe.spec(nodes.eq),
            Some(NodeSpec::Eq3 { low: 0.0, mid: 4.0, high: 0.0 })
        );
        assert_eq!(width(&graph, &probe), 0.8);
        assert_eq!(probe.volume_db(nodes.player), Some(f32::NEG_INFINITY));
    }
}
