use accord_db::jobs;
use accord_types::api::SweepReport;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::Engine;
use crate::error::Result;

pub const MAINTENANCE_JOB: &str = "maintenance";

/// Self-throttling entry point for periodic work.
///
/// The host decides how often to knock; the gate decides whether anything
/// runs. The claim is a conditional write on `job_runs`, so any number of
/// processes can share a database and at most one of them runs a given job
/// per interval.
pub struct PeriodicGate<'a> {
    engine: &'a Engine,
}

impl<'a> PeriodicGate<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Run `f` if `job` has not run within `interval`. Returns `None` when
    /// the job was not due.
    pub fn run_if_due<T>(
        &self,
        job: &str,
        interval: Duration,
        f: impl FnOnce(DateTime<Utc>) -> Result<T>,
    ) -> Result<Option<T>> {
        let now = self.engine.now();
        let claimed = self
            .engine
            .db()
            .with_conn_mut(|conn| jobs::claim(conn, job, interval.num_seconds(), now))?;
        if !claimed {
            debug!("Job {} not due yet", job);
            return Ok(None);
        }
        f(now).map(Some)
    }

    /// Sweep expired rooms and expire stale proposals, if due.
    pub fn run_maintenance_if_due(&self, interval: Duration) -> Result<Option<SweepReport>> {
        self.run_if_due(MAINTENANCE_JOB, interval, |now| self.maintain(now))
    }

    /// Unthrottled maintenance pass, for operators.
    pub fn run_maintenance(&self) -> Result<SweepReport> {
        self.maintain(self.engine.now())
    }

    fn maintain(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let report = SweepReport {
            rooms_closed: self.engine.rooms().sweep_expired(now)?,
            matches_expired: self.engine.matches().expire_stale(now)?,
        };
        if report.rooms_closed > 0 || report.matches_expired > 0 {
            info!(
                "Maintenance: {} rooms closed, {} proposals expired",
                report.rooms_closed, report.matches_expired
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{INTRO, harness};
    use accord_types::models::Fid;

    #[test]
    fn gate_runs_once_per_interval() {
        let h = harness();
        let gate = h.engine.scheduler();
        let every = Duration::seconds(60);

        assert_eq!(gate.run_if_due("tick", every, |_| Ok(1)).unwrap(), Some(1));
        assert_eq!(gate.run_if_due("tick", every, |_| Ok(2)).unwrap(), None);

        h.clock.advance(Duration::seconds(60));
        assert_eq!(gate.run_if_due("tick", every, |_| Ok(3)).unwrap(), Some(3));
    }

    #[test]
    fn maintenance_sweeps_rooms_and_stale_proposals() {
        let h = harness();
        let m = h.engine.matches().propose(Fid(100), Fid(100), Fid(200), INTRO).unwrap();
        h.engine.matches().accept(m.id, Fid(100)).unwrap();
        let room_id = h
            .engine
            .matches()
            .accept(m.id, Fid(200))
            .unwrap()
            .into_record()
            .room_id
            .unwrap();
        h.engine.rooms().join(room_id, Fid(100)).unwrap();
        h.engine.matches().propose(Fid(300), Fid(300), Fid(400), INTRO).unwrap();

        h.clock.advance(Duration::days(15));
        let report = h
            .engine
            .scheduler()
            .run_maintenance_if_due(Duration::seconds(60))
            .unwrap()
            .unwrap();
        assert_eq!(report.rooms_closed, 1);
        assert_eq!(report.matches_expired, 1);

        let again = h.engine.scheduler().run_maintenance().unwrap();
        assert_eq!((again.rooms_closed, again.matches_expired), (0, 0));
    }
}
