//! Vivaldi update engine
//!
//! Each node owns one engine. Updates take `&mut self`, so a node shared
//! between tasks needs an outer lock.

use super::position::VivaldiV1;
use super::{
    CC, CE, CONVERGE_EVERY, CONVERGE_FACTOR, ERROR_MIN, INITIAL_ERROR, MAX_RTT, VivaldiError,
};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

/// RTT used for the forced convergence step (ms)
const CONVERGE_RTT: f32 = 10.0;

/// Outcome of a successful [`VivaldiEngine::update`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateReport {
    /// Position after the update
    pub position: VivaldiV1,
    /// The computed step was invalid and the position went back to origin
    pub reset: bool,
    /// A forced convergence step ran after the sample
    pub converged: bool,
}

/// Owner of a node's coordinate
#[derive(Debug, Clone)]
pub struct VivaldiEngine {
    position: VivaldiV1,
    real_updates: u32,
    rng: StdRng,
}

impl VivaldiEngine {
    /// Start at the origin with the initial error
    #[must_use]
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Start at the origin with a deterministic perturbation source
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            position: VivaldiV1::origin(),
            real_updates: 0,
            rng,
        }
    }

    /// Start from a previously stored position
    ///
    /// A stored error that is not finite falls back to the initial error;
    /// anything below the floor is raised to it.
    #[must_use]
    pub fn with_position(mut self, position: VivaldiV1) -> Self {
        let error = if position.error.is_finite() {
            position.error.max(ERROR_MIN)
        } else {
            INITIAL_ERROR
        };
        if error != position.error {
            tracing::debug!("stored Vivaldi error {} replaced by {error}", position.error);
        }
        self.position = position.with_error(error);
        self
    }

    /// Current coordinate
    #[must_use]
    pub fn position(&self) -> VivaldiV1 {
        self.position
    }

    /// Current local error estimate
    #[must_use]
    pub fn error(&self) -> f32 {
        self.position.error
    }

    /// Samples from measured peers since the last forced convergence
    #[must_use]
    pub fn pending_updates(&self) -> u32 {
        self.real_updates
    }

    /// Forget the position
    pub fn reset(&mut self) {
        self.position = VivaldiV1::origin();
        self.real_updates = 0;
    }

    /// Estimated latency to `peer`
    #[must_use]
    pub fn distance(&self, peer: &VivaldiV1) -> f32 {
        self.position.distance(peer)
    }

    /// RTT estimate to `peer`, NaN while either side is unmeasured
    #[must_use]
    pub fn estimate_rtt(&self, peer: &VivaldiV1) -> f32 {
        self.position.estimate_rtt(peer)
    }

    /// Move the coordinate towards agreement with a measured RTT (ms) to
    /// `peer`, which reported `peer_error`
    ///
    /// Every [`CONVERGE_EVERY`] samples from measured peers, one more step
    /// is taken against the origin to counteract drift.
    ///
    /// # Errors
    ///
    /// Rejects the sample without touching the coordinate if the RTT is not
    /// in `(0, 300000]`, the peer error is not finite, either position is
    /// invalid or the two errors sum to zero.
    pub fn update(
        &mut self,
        rtt: f32,
        peer: &VivaldiV1,
        peer_error: f32,
    ) -> Result<UpdateReport, VivaldiError> {
        let mut rtt = rtt;
        let mut peer = *peer;
        let mut peer_error = peer_error;
        let mut report = UpdateReport {
            position: self.position,
            reset: false,
            converged: false,
        };

        loop {
            self.validate(rtt, &peer, peer_error)?;
            report.reset |= self.step(rtt, &peer, peer_error);

            if !peer.at_origin() {
                self.real_updates += 1;
            }

            if self.real_updates < CONVERGE_EVERY || report.converged {
                break;
            }

            tracing::debug!("forcing convergence after {} updates", self.real_updates);
            self.real_updates = 0;
            report.converged = true;
            rtt = CONVERGE_RTT;
            peer = VivaldiV1::origin();
            peer_error = CONVERGE_FACTOR;
        }

        report.position = self.position;
        Ok(report)
    }

    fn validate(&self, rtt: f32, peer: &VivaldiV1, peer_error: f32) -> Result<(), VivaldiError> {
        if !rtt.is_finite() || rtt <= 0.0 || rtt > MAX_RTT {
            tracing::warn!("Vivaldi update rejected: RTT {rtt}");
            return Err(VivaldiError::InvalidRtt(rtt));
        }

        if !peer_error.is_finite() {
            tracing::warn!("Vivaldi update rejected: peer error {peer_error}");
            return Err(VivaldiError::InvalidPeerError(peer_error));
        }

        if !self.position.is_valid() || !peer.is_valid() {
            tracing::warn!("Vivaldi update rejected: local {} peer {peer}", self.position);
            return Err(VivaldiError::InvalidPosition);
        }

        if self.position.error + peer_error == 0.0 {
            return Err(VivaldiError::ZeroError);
        }

        Ok(())
    }

    /// One spring step; returns true if the position had to be reset
    fn step(&mut self, rtt: f32, peer: &VivaldiV1, peer_error: f32) -> bool {
        let local = self.position;
        let w = local.error / (peer_error + local.error);
        let re = rtt - local.distance(peer);
        let es = re.abs() / rtt;
        let new_error = es * CE * w + local.error * (1.0 - CE * w);
        let scale = CC * w * re;

        // Perturb the peer so coincident positions still separate
        let perturbation = VivaldiV1::new(
            self.rng.r#gen::<f32>() / 10.0,
            self.rng.r#gen::<f32>() / 10.0,
            0.0,
        );
        let direction = local.sub(&peer.add(&perturbation)).unity(&mut self.rng);
        let candidate = local.add(&direction.scale(scale));

        tracing::debug!("w={w} re={re} es={es} new_error={new_error} scale={scale}");

        if new_error.is_finite() && candidate.is_valid() {
            self.position = candidate.with_error(new_error.max(ERROR_MIN));
            false
        } else {
            tracing::warn!("Vivaldi step produced {candidate} (error {new_error}), resetting");
            self.position = VivaldiV1::origin().with_error(INITIAL_ERROR);
            true
        }
    }
}

impl Default for VivaldiEngine {
    fn default() -> Self {
        Self::new()
    }
}
