// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Configuration of the crossbar and the burst converter.
//!
//! Configuration structures can be loaded with [`load_config`] which layers,
//! in increasing order of precedence:
//!
//!  1. the `Default` of the structure,
//!  2. an optional TOML file,
//!  3. environment variables prefixed with `XBAR_` (for example
//!     `XBAR_MAX_TRANS=4`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use xbar_engine::sim_error;
use xbar_engine::types::{ProtocolChecking, SimError, SimResult};

use crate::arbiter::ArbiterPolicy;
use crate::decoder::{AddrRule, DefaultRoute};
use crate::demux::DemuxConfig;
use crate::link::LinkDepths;
use crate::mux::MuxConfig;

pub const ENV_PREFIX: &str = "XBAR_";

/// Parameters of a [`Crossbar`](crate::crossbar::Crossbar).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CrossbarConfig {
    pub num_ingress: usize,
    pub num_egress: usize,

    /// `connectivity[i][j]` enables the pair ingress `i`, egress `j`. An empty
    /// matrix enables every pair.
    pub connectivity: Vec<Vec<bool>>,

    pub rules: Vec<AddrRule>,

    /// Default route per ingress. Missing entries are disabled.
    pub default_routes: Vec<DefaultRoute>,

    pub link_depths: LinkDepths,

    /// Outstanding requests per direction per ingress.
    pub max_trans: usize,

    /// Outstanding writes per egress.
    pub max_w_trans: usize,

    /// Outstanding requests per direction of each error responder.
    pub error_max_trans: usize,

    pub unique_ids: bool,
    pub id_used_bits: u32,

    /// Width of the identifiers on the ingress ports.
    pub id_width: u32,

    pub atomics: bool,
    pub fall_through: bool,
    pub checking: ProtocolChecking,
    pub aw_arbiter: ArbiterPolicy,
    pub ar_arbiter: ArbiterPolicy,
}

impl Default for CrossbarConfig {
    fn default() -> Self {
        Self {
            num_ingress: 2,
            num_egress: 2,
            connectivity: Vec::new(),
            rules: vec![
                AddrRule::new(0x0000_0000, 0x1000_0000, 0),
                AddrRule::new(0x1000_0000, 0x2000_0000, 1),
            ],
            default_routes: Vec::new(),
            link_depths: LinkDepths::default(),
            max_trans: 8,
            max_w_trans: 8,
            error_max_trans: 4,
            unique_ids: false,
            id_used_bits: 4,
            id_width: 4,
            atomics: false,
            fall_through: true,
            checking: ProtocolChecking::Strict,
            aw_arbiter: ArbiterPolicy::RoundRobin,
            ar_arbiter: ArbiterPolicy::RoundRobin,
        }
    }
}

impl CrossbarConfig {
    /// Check the configuration is consistent.
    pub fn validate(&self) -> SimResult {
        if self.num_ingress == 0 || self.num_egress == 0 {
            return sim_error!("crossbar needs at least one ingress and one egress port");
        }
        if self.max_trans == 0 || self.max_w_trans == 0 || self.error_max_trans == 0 {
            return sim_error!("transaction limits must be non-zero");
        }
        if !self.connectivity.is_empty() {
            if self.connectivity.len() != self.num_ingress {
                return sim_error!(
                    "connectivity has {} rows, expected {}",
                    self.connectivity.len(),
                    self.num_ingress
                );
            }
            if let Some((i, row)) = self
                .connectivity
                .iter()
                .enumerate()
                .find(|(_, row)| row.len() != self.num_egress)
            {
                return sim_error!(
                    "connectivity row {i} has {} entries, expected {}",
                    row.len(),
                    self.num_egress
                );
            }
        }
        if self.default_routes.len() > self.num_ingress {
            return sim_error!(
                "{} default routes for {} ingress ports",
                self.default_routes.len(),
                self.num_ingress
            );
        }
        for (i, route) in self.default_routes.iter().enumerate() {
            if route.enable && route.target >= self.num_egress {
                return sim_error!("default route {i} targets egress {}", route.target);
            }
        }
        let lane_bits = usize::BITS - (self.num_ingress - 1).leading_zeros();
        if self.id_width.saturating_add(lane_bits) > u32::BITS {
            return sim_error!(
                "id_width {} leaves no room for {} ingress ports",
                self.id_width,
                self.num_ingress
            );
        }
        Ok(())
    }

    /// True when ingress `i` may reach egress `j`.
    #[must_use]
    pub fn is_enabled(&self, i: usize, j: usize) -> bool {
        self.connectivity
            .get(i)
            .and_then(|row| row.get(j))
            .copied()
            .unwrap_or(self.connectivity.is_empty())
    }

    #[must_use]
    pub fn default_route(&self, i: usize) -> DefaultRoute {
        self.default_routes.get(i).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn demux_config(&self) -> DemuxConfig {
        DemuxConfig {
            num_lanes: self.num_egress,
            max_trans: self.max_trans,
            unique_ids: self.unique_ids,
            id_used_bits: self.id_used_bits,
            atomics: self.atomics,
            checking: self.checking,
        }
    }

    #[must_use]
    pub fn mux_config(&self) -> MuxConfig {
        MuxConfig {
            num_lanes: self.num_ingress,
            id_width: self.id_width,
            max_w_trans: self.max_w_trans,
            fall_through: self.fall_through,
            aw_policy: self.aw_arbiter.clone(),
            ar_policy: self.ar_arbiter.clone(),
            checking: self.checking,
        }
    }
}

/// Parameters of a [`BurstConverter`](crate::burst_converter::BurstConverter).
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Largest descending burst that can be buffered.
    pub max_beats: usize,

    pub checking: ProtocolChecking,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            max_beats: 16,
            checking: ProtocolChecking::Strict,
        }
    }
}

fn figment_with_defaults<T>() -> Figment
where
    T: Default + Serialize,
{
    Figment::new().merge(Serialized::defaults(T::default()))
}

fn figment_conf_file_merge(config: Figment, conf_file: &Path) -> Figment {
    config.merge(Toml::file(conf_file))
}

fn figment_env_var_merge(config: Figment) -> Figment {
    config.merge(Env::prefixed(ENV_PREFIX))
}

/// Load a configuration from its defaults, an optional TOML file and the
/// environment.
pub fn load_config<T>(conf_file: Option<&Path>) -> Result<T, SimError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let mut config = figment_with_defaults::<T>();
    if let Some(conf_file) = conf_file {
        if !conf_file.is_file() {
            return sim_error!("{} not found", conf_file.display());
        }
        config = figment_conf_file_merge(config, conf_file);
    }
    config = figment_env_var_merge(config);
    config
        .extract()
        .map_err(|e| SimError(format!("invalid configuration: {e}")))
}
