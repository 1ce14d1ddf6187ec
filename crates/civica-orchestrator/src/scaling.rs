use crate::config::ScalingPolicy;
use crate::resources::ResourceManager;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Smoothing factor of the predicted-demand moving average.
const DEMAND_SMOOTHING: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalingAction {
    None,
    ScaleUp { from: u32, to: u32 },
    ScaleDown { from: u32, to: u32 },
}

/// Outcome of one control-loop tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub utilization: f64,
    /// Exponential moving average of sampled utilization. Reported only.
    pub predicted_demand: f64,
    pub action: ScalingAction,
    /// Instance count after the decision.
    pub instances: u32,
    pub capacity: u32,
    pub decided_at: DateTime<Utc>,
}

struct ScalingState {
    last_action: Option<Instant>,
    predicted_demand: Option<f64>,
}

/// Periodic control loop growing and shrinking the instance pool.
///
/// Cooldown counts from the last action of either direction, so utilization
/// oscillating around both thresholds changes the pool at most once per
/// cooldown period.
pub struct ScalingManager {
    policy: ScalingPolicy,
    resources: Arc<ResourceManager>,
    state: Mutex<ScalingState>,
}

impl ScalingManager {
    pub fn new(policy: ScalingPolicy, resources: Arc<ResourceManager>) -> Self {
        Self {
            policy,
            resources,
            state: Mutex::new(ScalingState {
                last_action: None,
                predicted_demand: None,
            }),
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Allocated slots over the capacity of a fully scaled pool.
    pub fn utilization(&self) -> f64 {
        let full = self.policy.max_instances * self.policy.per_instance_concurrency;
        if full == 0 {
            return 0.0;
        }
        (f64::from(self.resources.allocated_slots()) / f64::from(full)).min(1.0)
    }

    /// Run one tick against the live utilization.
    pub fn evaluate(&self) -> ScalingDecision {
        self.evaluate_at(self.utilization(), Instant::now())
    }

    /// Run one tick for a given utilization sample taken at `now`.
    pub fn evaluate_at(&self, utilization: f64, now: Instant) -> ScalingDecision {
        let mut state = self.state.lock();

        let predicted_demand = match state.predicted_demand {
            Some(previous) => DEMAND_SMOOTHING * utilization + (1.0 - DEMAND_SMOOTHING) * previous,
            None => utilization,
        };
        state.predicted_demand = Some(predicted_demand);

        let cooled_down = state.last_action.map_or(true, |at| {
            now.saturating_duration_since(at) >= self.policy.cooldown_period()
        });
        let current = self.resources.instances();

        let target = if !cooled_down {
            current
        } else if utilization >= self.policy.scale_up_threshold {
            (current + self.policy.scale_up_increment).min(self.policy.max_instances)
        } else if utilization <= self.policy.scale_down_threshold {
            current.saturating_sub(self.policy.scale_down_increment).max(1)
        } else {
            current
        };

        let action = if target > current {
            ScalingAction::ScaleUp {
                from: current,
                to: target,
            }
        } else if target < current {
            ScalingAction::ScaleDown {
                from: current,
                to: target,
            }
        } else {
            ScalingAction::None
        };

        // Resize while the state lock is held so the instance count and the
        // capacity change together.
        let capacity = if action == ScalingAction::None {
            self.resources.capacity()
        } else {
            state.last_action = Some(now);
            self.resources.resize(target)
        };
        drop(state);

        match action {
            ScalingAction::None => debug!(
                utilization,
                predicted_demand,
                instances = current,
                cooled_down,
                "Scaling: no action"
            ),
            _ => info!(
                utilization,
                predicted_demand,
                from = current,
                to = target,
                capacity,
                "Scaling action applied"
            ),
        }

        ScalingDecision {
            utilization,
            predicted_demand,
            action,
            instances: target,
            capacity,
            decided_at: Utc::now(),
        }
    }

    /// Spawn the control loop, ticking every `interval`.
    ///
    /// Returns the [`tokio::task::JoinHandle`] so the caller can abort it.
    pub fn start(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Scaling loop started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.evaluate();
            }
        })
    }
}
