use crate::viewer_bridge::hub::ViewerHub;
use crate::viewer_bridge::model::StatusBoard;
use chrono::{DateTime, Utc};
use dwellcore::detection::{Classification, DetectionFilter};
use dwellcore::episode::{CommitRequest, EpisodeTracker};
use dwellcore::prelude::DwellConfig;
use dwellcore::recorder::{Ack, EventRecorder, RecordError, RecordSink};
use dwellcore::telemetry::PipelineMetrics;
use dwellcore::viewer::ViewerMessage;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

type InFlight = (CommitRequest, JoinHandle<Result<Ack, RecordError>>);

/// Single owner of the episode tracker.
///
/// Commit attempts run as detached tasks. Each frame folds the outcomes that
/// have already finished back into the tracker, in dispatch order, before its
/// own transition; it never waits on one that has not.
pub struct Pipeline<S: RecordSink> {
    filter: DetectionFilter,
    tracker: EpisodeTracker,
    recorder: Arc<EventRecorder<S>>,
    hub: ViewerHub,
    metrics: Arc<PipelineMetrics>,
    status: Arc<StatusBoard>,
    in_flight: VecDeque<InFlight>,
}

impl<S: RecordSink> Pipeline<S> {
    pub fn new(
        config: &DwellConfig,
        sink: S,
        hub: ViewerHub,
        metrics: Arc<PipelineMetrics>,
        status: Arc<StatusBoard>,
    ) -> Self {
        let tracker = EpisodeTracker::new(config);
        status.set_episodes(tracker.snapshot());
        Self {
            filter: DetectionFilter::new(config.confidence_threshold),
            tracker,
            recorder: Arc::new(EventRecorder::new(sink, config)),
            hub,
            metrics,
            status,
            in_flight: VecDeque::new(),
        }
    }

    /// Handles one classified frame observed at `now`; returns the commits
    /// dispatched for it.
    pub async fn process(
        &mut self,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> Vec<CommitRequest> {
        self.metrics.record_frame();
        let filtered = self.filter.apply(&classification.detections);

        let message = ViewerMessage::classification(&filtered, classification.timing_ms);
        if let ViewerMessage::Classification { result, .. } = &message {
            self.status.set_last_classification(result.clone());
        }
        self.hub.publish(message);

        self.harvest(now).await;

        let requests = self.tracker.observe(&filtered, now);
        for request in &requests {
            self.dispatch(request.clone());
        }
        self.status.set_episodes(self.tracker.snapshot());
        requests
    }

    fn dispatch(&mut self, request: CommitRequest) {
        self.metrics.record_commit_requested();
        debug!("dispatching commit for {}", request.label);
        let recorder = self.recorder.clone();
        let task_request = request.clone();
        let handle = tokio::spawn(async move { recorder.commit(&task_request).await });
        self.in_flight.push_back((request, handle));
    }

    /// Applies the outcomes of commits that have already finished, stopping
    /// at the first one still running.
    async fn harvest(&mut self, now: DateTime<Utc>) {
        while self
            .in_flight
            .front()
            .is_some_and(|(_, handle)| handle.is_finished())
        {
            if let Some((request, handle)) = self.in_flight.pop_front() {
                let outcome = handle.await;
                self.apply(&request, outcome, now);
            }
        }
    }

    /// Waits for every outstanding commit and applies the outcomes in
    /// dispatch order.
    pub async fn drain(&mut self) {
        while let Some((request, handle)) = self.in_flight.pop_front() {
            let outcome = handle.await;
            self.apply(&request, outcome, Utc::now());
        }
        self.status.set_episodes(self.tracker.snapshot());
    }

    fn apply(
        &mut self,
        request: &CommitRequest,
        outcome: Result<Result<Ack, RecordError>, JoinError>,
        now: DateTime<Utc>,
    ) {
        match outcome {
            Ok(Ok(ack)) => {
                self.metrics.record_commit_acknowledged();
                self.tracker.acknowledge(request, ack.record.created_at);
                self.status.set_last_record(ack.record);
            }
            Ok(Err(err)) => {
                self.metrics.record_commit_failed();
                debug!("{}", err);
                self.tracker.reject(request, err.transient, now);
            }
            Err(err) => {
                warn!("commit task for {} aborted: {}", request.label, err);
                self.metrics.record_commit_failed();
                self.tracker.reject(request, true, now);
            }
        }
    }

    #[cfg(test)]
    pub fn episode(&self, label: &str) -> Option<dwellcore::episode::EpisodeState> {
        self.tracker.state(label)
    }

    /// Consumes classifications in arrival order until the channel closes or
    /// shutdown is signalled.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<Classification>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "pipeline tracking {:?}",
            self.tracker.tracked_labels().collect::<Vec<_>>()
        );
        loop {
            tokio::select! {
                next = frames.recv() => match next {
                    Some(classification) => {
                        self.process(classification, Utc::now()).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        self.drain().await;
        let snapshot = self.metrics.snapshot();
        info!(
            "pipeline stopped after {} frame(s), {} episode(s) recorded",
            snapshot.frames, snapshot.commits_acknowledged
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewer_bridge::hub::tests::model;
    use chrono::TimeZone;
    use dwellcore::detection::{BoundingBox, Detection};
    use dwellcore::episode::EpisodeState;
    use dwellcore::recorder::MemorySink;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    const LABEL: &str = "coffee-cup";

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn present() -> Classification {
        Classification {
            detections: vec![
                Detection::new(LABEL, 0.6, BoundingBox::default()),
                Detection::new(LABEL, 0.9, BoundingBox::default()),
            ],
            timing_ms: 5,
        }
    }

    fn absent() -> Classification {
        Classification::default()
    }

    fn pipeline_with(
        config: &DwellConfig,
        sink: MemorySink,
    ) -> (Pipeline<MemorySink>, ViewerHub, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let hub = ViewerHub::new(64, &model(), metrics.clone());
        let status = Arc::new(StatusBoard::new(metrics.clone(), "memory".into()));
        let pipeline = Pipeline::new(config, sink, hub.clone(), metrics.clone(), status);
        (pipeline, hub, metrics)
    }

    fn pipeline(sink: MemorySink) -> (Pipeline<MemorySink>, ViewerHub, Arc<PipelineMetrics>) {
        pipeline_with(&DwellConfig::default(), sink)
    }

    /// Processes a frame, then lets spawned commit tasks run.
    async fn step(
        pipeline: &mut Pipeline<MemorySink>,
        classification: Classification,
        t: i64,
    ) -> Vec<CommitRequest> {
        let requests = pipeline.process(classification, at(t)).await;
        tokio::task::yield_now().await;
        requests
    }

    fn is_pending(state: Option<EpisodeState>) -> bool {
        matches!(state, Some(EpisodeState::Rising { pending: true, .. }))
    }

    #[tokio::test]
    async fn sustained_presence_records_exactly_once() {
        let sink = MemorySink::new();
        let (mut pipeline, _hub, metrics) = pipeline(sink.clone());

        let mut dispatched = Vec::new();
        for n in 0..=50 {
            dispatched.extend(step(&mut pipeline, present(), n * 100).await);
        }
        pipeline.drain().await;

        assert_eq!(dispatched, vec![CommitRequest::new(LABEL, at(0), at(3100))]);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].action, "coffee-cup detected");
        assert!(pipeline.episode(LABEL).unwrap().is_committed());
        assert_eq!(metrics.snapshot().frames, 51);
        assert_eq!(metrics.snapshot().commits_acknowledged, 1);
    }

    #[tokio::test]
    async fn failed_write_is_retried_on_next_frame() {
        let sink = MemorySink::new();
        sink.fail_next(1);
        let (mut pipeline, _hub, metrics) = pipeline(sink.clone());

        let mut dispatched = Vec::new();
        for n in 0..=40 {
            dispatched.extend(step(&mut pipeline, present(), n * 100).await);
        }
        pipeline.drain().await;

        let times: Vec<i64> = dispatched
            .iter()
            .map(|r| r.occurred_at.timestamp_millis())
            .collect();
        assert_eq!(times, vec![3100, 3200]);
        assert_eq!(sink.attempts(), 2);
        assert_eq!(sink.records().len(), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commits_requested, 2);
        assert_eq!(snapshot.commits_failed, 1);
        assert_eq!(snapshot.commits_acknowledged, 1);
    }

    #[tokio::test]
    async fn failure_followed_by_absence_misses_the_episode() {
        let sink = MemorySink::new();
        sink.fail_next(1);
        let (mut pipeline, _hub, _metrics) = pipeline(sink.clone());

        for n in 0..=31 {
            step(&mut pipeline, present(), n * 100).await;
        }
        assert!(step(&mut pipeline, absent(), 3200).await.is_empty());
        pipeline.drain().await;

        assert!(sink.records().is_empty());
        assert_eq!(pipeline.episode(LABEL), Some(EpisodeState::Idle));
    }

    #[tokio::test]
    async fn reappearance_starts_a_new_episode() {
        let sink = MemorySink::new();
        let (mut pipeline, _hub, _metrics) = pipeline(sink.clone());

        for n in 0..=20 {
            step(&mut pipeline, present(), n * 100).await;
        }
        step(&mut pipeline, absent(), 2001).await;
        let mut dispatched = Vec::new();
        let mut t = 2002;
        while t <= 2002 + 3500 {
            dispatched.extend(step(&mut pipeline, present(), t).await);
            t += 100;
        }
        pipeline.drain().await;

        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].episode_start, at(2002));
        assert_eq!(dispatched[0].occurred_at, at(5102));
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sink_does_not_hold_up_frames() {
        let sink = MemorySink::new();
        sink.set_delay(Some(Duration::from_millis(1500)));
        let (mut pipeline, hub, _metrics) = pipeline(sink.clone());
        let mut viewer = hub.subscribe();

        let started = tokio::time::Instant::now();
        let mut dispatched = Vec::new();
        for n in 0..=50 {
            dispatched.extend(step(&mut pipeline, present(), n * 100).await);
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(dispatched.len(), 1, "pending label must not re-dispatch");
        assert!(is_pending(pipeline.episode(LABEL)));
        assert!(sink.records().is_empty());

        let mut pushed = 0;
        loop {
            match viewer.try_recv() {
                Ok(ViewerMessage::Classification { .. }) => pushed += 1,
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(err) => panic!("viewer fell behind: {:?}", err),
            }
        }
        assert_eq!(pushed, 51);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(step(&mut pipeline, present(), 5100).await.is_empty());
        assert!(pipeline.episode(LABEL).unwrap().is_committed());
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_commit_is_rejected_and_retried() {
        let config = DwellConfig {
            commit_timeout_ms: 100,
            ..Default::default()
        };
        let sink = MemorySink::new();
        sink.set_delay(Some(Duration::from_secs(1)));
        let (mut pipeline, _hub, metrics) = pipeline_with(&config, sink.clone());

        let mut dispatched = Vec::new();
        for n in 0..=31 {
            dispatched.extend(step(&mut pipeline, present(), n * 100).await);
        }
        assert!(is_pending(pipeline.episode(LABEL)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        sink.set_delay(None);
        dispatched.extend(step(&mut pipeline, present(), 3200).await);
        match pipeline.episode(LABEL) {
            Some(EpisodeState::Rising {
                attempts, pending, ..
            }) => {
                assert_eq!(attempts, 1);
                assert!(pending);
            }
            other => panic!("unexpected state {:?}", other),
        }

        step(&mut pipeline, present(), 3300).await;
        assert!(pipeline.episode(LABEL).unwrap().is_committed());

        let times: Vec<i64> = dispatched
            .iter()
            .map(|r| r.occurred_at.timestamp_millis())
            .collect();
        assert_eq!(times, vec![3100, 3200]);
        assert_eq!(sink.records().len(), 1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commits_failed, 1);
        assert_eq!(snapshot.commits_acknowledged, 1);
    }

    #[tokio::test]
    async fn viewers_receive_filtered_classifications() {
        let (mut pipeline, hub, _metrics) = pipeline(MemorySink::new());
        let mut viewer = hub.subscribe();

        pipeline.process(present(), at(0)).await;

        match viewer.recv().await.unwrap() {
            ViewerMessage::Classification { result, time_ms } => {
                assert_eq!(time_ms, 5);
                assert_eq!(result.detections.len(), 1);
                assert_eq!(result.detections[0].confidence, 0.9);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_drains_channel_and_stops() {
        let sink = MemorySink::new();
        let (pipeline, _hub, metrics) = pipeline(sink);
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(pipeline.run(rx, shutdown_rx));
        tx.send(present()).await.unwrap();
        tx.send(absent()).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(metrics.snapshot().frames, 2);
    }
}
