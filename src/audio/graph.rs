//! The processing graph and its mount lifecycle
//!
//! ```text
//! player -> eq3 -> compressor -> widener -> crossfade(A) -> destination
//!                                   \-> analyser
//! ```
//!
//! The graph is the single owner of the backend. It is built once per mount
//! and torn down on dispose; a build that finishes after its mount went away
//! disposes itself instead of attaching.

use super::backend::{AudioBackend, Endpoint, NodeId, NodeSpec, Param};
use crate::config::EngineConfig;
use crate::error::{BackendError, GraphError};
use tracing::{debug, info, warn};

/// Ids of every node in a wired graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphNodes {
    pub player: NodeId,
    pub eq: NodeId,
    pub compressor: NodeId,
    pub widener: NodeId,
    pub crossfade: NodeId,
    pub analyser: NodeId,
}

impl GraphNodes {
    fn all(&self) -> [NodeId; 6] {
        [
            self.player,
            self.eq,
            self.compressor,
            self.widener,
            self.crossfade,
            self.analyser,
        ]
    }
}

/// A fully wired graph waiting to be attached to the mount it was built for
#[derive(Debug)]
#[must_use = "a pending graph holds live nodes until completed"]
pub struct PendingGraph {
    epoch: u64,
    nodes: GraphNodes,
}

/// Disposes everything it created unless the build finishes
struct Teardown<'a, B: AudioBackend> {
    backend: &'a mut B,
    created: Vec<NodeId>,
}

impl<'a, B: AudioBackend> Teardown<'a, B> {
    fn new(backend: &'a mut B) -> Self {
        Self {
            backend,
            created: Vec::new(),
        }
    }

    fn create(&mut self, spec: NodeSpec) -> Result<NodeId, BackendError> {
        let id = self.backend.create_node(&spec)?;
        self.created.push(id);
        Ok(id)
    }

    fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), BackendError> {
        self.backend.connect(from, to)
    }

    fn finish(mut self) {
        self.created.clear();
    }
}

impl<B: AudioBackend> Drop for Teardown<'_, B> {
    fn drop(&mut self) {
        for id in self.created.drain(..).rev() {
            self.backend.dispose_node(id);
        }
    }
}

fn build_nodes<B: AudioBackend>(
    backend: &mut B,
    config: &EngineConfig,
) -> Result<GraphNodes, BackendError> {
    let mut build = Teardown::new(backend);

    let player = build.create(NodeSpec::Player)?;
    let eq = build.create(NodeSpec::Eq3 {
        low: 0.0,
        mid: 0.0,
        high: 0.0,
    })?;
    let compressor = build.create(NodeSpec::Compressor {
        threshold_db: config.compressor_threshold_db,
        ratio: config.compressor_ratio,
    })?;
    let widener = build.create(NodeSpec::StereoWidener {
        width: config.neutral_width,
    })?;
    let crossfade = build.create(NodeSpec::CrossFade { fade: 0.0 })?;
    let analyser = build.create(NodeSpec::Analyser {
        size: config.analyser_size,
    })?;

    build.connect(player, Endpoint::Node(eq))?;
    build.connect(eq, Endpoint::Node(compressor))?;
    build.connect(compressor, Endpoint::Node(widener))?;
    build.connect(widener, Endpoint::CrossFadeA(crossfade))?;
    build.connect(crossfade, Endpoint::Destination)?;
    // spectrum reflects EQ + dynamics, not the output mix
    build.connect(widener, Endpoint::Node(analyser))?;

    build.finish();
    Ok(GraphNodes {
        player,
        eq,
        compressor,
        widener,
        crossfade,
        analyser,
    })
}

pub struct AudioGraph<B: AudioBackend> {
    backend: B,
    config: EngineConfig,
    nodes: Option<GraphNodes>,
    mounted: bool,
    epoch: u64,
}

impl<B: AudioBackend> AudioGraph<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            nodes: None,
            mounted: false,
            epoch: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn nodes(&self) -> Option<GraphNodes> {
        self.nodes
    }

    pub fn is_ready(&self) -> bool {
        self.nodes.is_some()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Bumped on every dispose; anything stamped with an older epoch is stale
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Mount and build in one go. Returns `false` if a graph was already attached.
    pub fn initialize(&mut self) -> Result<bool, GraphError> {
        if self.nodes.is_some() {
            debug!("audio graph already initialized");
            return Ok(false);
        }
        let pending = self.begin_initialize()?;
        self.complete_initialize(pending)
    }

    /// Mount and build a graph without attaching it yet
    pub fn begin_initialize(&mut self) -> Result<PendingGraph, GraphError> {
        self.mounted = true;
        let nodes = build_nodes(&mut self.backend, &self.config)?;
        debug!("built audio graph {:?}", nodes);
        Ok(PendingGraph {
            epoch: self.epoch,
            nodes,
        })
    }

    /// Attach a built graph. A graph from an old mount is disposed and
    /// reported as [`GraphError::Stale`]; a duplicate of an attached graph is
    /// disposed and reported as `Ok(false)`.
    pub fn complete_initialize(&mut self, pending: PendingGraph) -> Result<bool, GraphError> {
        if !self.mounted || pending.epoch != self.epoch {
            warn!("discarding audio graph built for a previous mount");
            self.release(pending.nodes);
            return Err(GraphError::Stale);
        }
        if self.nodes.is_some() {
            debug!("discarding duplicate audio graph");
            self.release(pending.nodes);
            return Ok(false);
        }

        self.nodes = Some(pending.nodes);
        info!("audio graph ready");
        Ok(true)
    }

    /// Stop playback and release every node. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        self.mounted = false;
        self.epoch += 1;
        if let Some(nodes) = self.nodes.take() {
            if let Err(e) = self.backend.stop(nodes.player) {
                debug!("stop during dispose failed: {}", e);
            }
            self.release(nodes);
            info!("audio graph disposed");
        }
    }

    fn release(&mut self, nodes: GraphNodes) {
        for id in nodes.all().into_iter().rev() {
            self.backend.dispose_node(id);
        }
    }

    /// Apply a parameter to one of the attached nodes
    pub fn set_param(
        &mut self,
        pick: impl FnOnce(&GraphNodes) -> NodeId,
        param: Param,
    ) -> Result<(), GraphError> {
        let nodes = self.nodes.ok_or(GraphError::Disposed)?;
        self.backend.set_param(pick(&nodes), param)?;
        Ok(())
    }
}
