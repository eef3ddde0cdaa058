//! Graph configuration

/// Default bound on ancestor-chain walks
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Tunables applied when a [`Graph`](crate::Graph) is created
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Maximum number of origin hops walked when checking for attachment
    /// cycles or escalating a binding. Deeper trees fail to attach.
    pub max_depth: usize,
    /// Whether lists with automatic attachment re-emit member events on
    /// the list itself unless suppressed per list
    pub propagate_list_events: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            propagate_list_events: true,
        }
    }
}

impl GraphConfig {
    /// Override the ancestor walk bound
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Enable or disable list event propagation by default
    pub fn with_list_propagation(mut self, propagate: bool) -> Self {
        self.propagate_list_events = propagate;
        self
    }
}
