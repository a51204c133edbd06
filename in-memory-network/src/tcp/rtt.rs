use std::time::Duration;

const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Smoothed RTT and retransmission timeout, following RFC 6298
#[derive(Clone, Debug)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
    granularity: Duration,
    backoff: u32,
}

impl RttEstimator {
    pub fn new(
        initial_rto: Duration,
        min_rto: Duration,
        max_rto: Duration,
        granularity: Duration,
    ) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: initial_rto,
            min_rto,
            max_rto,
            granularity,
            backoff: 0,
        }
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn add_sample(&mut self, sample: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(sample);
                self.rttvar = sample / 2;
            }
            Some(srtt) => {
                let deviation = if srtt > sample {
                    srtt - sample
                } else {
                    sample - srtt
                };
                self.rttvar = self.rttvar * 3 / 4 + deviation / 4;
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
        }

        let srtt = self.srtt.unwrap_or(sample);
        let rto = srtt + self.granularity.max(self.rttvar * 4);
        self.rto = rto.clamp(self.min_rto, self.max_rto);
    }

    /// The timeout to arm the retransmission timer with, backoff included
    pub fn rto(&self) -> Duration {
        let factor = 1u32 << self.backoff.min(MAX_BACKOFF_EXPONENT);
        self.rto.saturating_mul(factor).min(self.max_rto)
    }

    pub fn backoff(&mut self) {
        self.backoff = (self.backoff + 1).min(MAX_BACKOFF_EXPONENT);
    }

    pub fn reset_backoff(&mut self) {
        self.backoff = 0;
    }
}
