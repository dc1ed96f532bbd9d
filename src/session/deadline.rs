//! Deadline Watchers
//!
//! One task per active puzzle. It wakes every poll interval, re-reads the
//! puzzle's deadline under the session lock (Stall may have moved it) and
//! runs the timeout teardown once the deadline has passed.
//!
//! Any other transition cancels the watcher and awaits it before the session
//! changes again, so a stale watcher can never fire against a cleared or
//! replaced puzzle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::words::WordBank;
use crate::game::events::{GameEvent, Notification, NotificationSink};
use crate::game::puzzle::{Outcome, PuzzleId, PuzzleSession};

/// Shortest polling interval; `interval` rejects a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Cancellable handle to a running watcher.
#[derive(Debug)]
pub struct DeadlineHandle {
    puzzle_id: PuzzleId,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl DeadlineHandle {
    /// Stop the watcher and wait for it to exit.
    pub async fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Deadline watcher for {} panicked", self.puzzle_id);
            }
        }
    }

    /// Let the watcher run to completion on its own.
    pub fn detach(self) {}
}

/// Spawns deadline watchers.
#[derive(Clone)]
pub struct DeadlineScheduler {
    poll_interval: Duration,
    words: Arc<Mutex<WordBank>>,
    sink: Arc<dyn NotificationSink>,
}

impl DeadlineScheduler {
    /// Create a scheduler. Intervals below one millisecond are raised to it.
    pub fn new(poll_interval: Duration, words: Arc<Mutex<WordBank>>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            words,
            sink,
        }
    }

    /// Start watching `puzzle_id` in `session`.
    pub fn schedule(&self, session: Arc<Mutex<PuzzleSession>>, puzzle_id: PuzzleId) -> DeadlineHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(run_watcher(
            session,
            puzzle_id,
            cancel_rx,
            self.poll_interval,
            self.words.clone(),
            self.sink.clone(),
        ));

        DeadlineHandle {
            puzzle_id,
            cancel: Some(cancel_tx),
            task,
        }
    }
}

async fn run_watcher(
    session: Arc<Mutex<PuzzleSession>>,
    puzzle_id: PuzzleId,
    mut cancel: oneshot::Receiver<()>,
    poll_interval: Duration,
    words: Arc<Mutex<WordBank>>,
    sink: Arc<dyn NotificationSink>,
) {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut cancel => return,
            _ = ticker.tick() => {}
        }

        // The canceller may hold the session lock while awaiting us.
        let mut guard = tokio::select! {
            biased;
            _ = &mut cancel => return,
            guard = session.lock() => guard,
        };

        let expired = match guard.puzzle.as_ref() {
            Some(puzzle) if puzzle.id == puzzle_id => puzzle.is_expired(Instant::now()),
            _ => {
                debug!("Watcher for {} found no matching puzzle", puzzle_id);
                return;
            }
        };
        if !expired {
            continue;
        }

        let user = guard.user;
        if let Some(done) = guard.conclude(Outcome::TimedOut, &words).await {
            drop(guard);
            info!("Puzzle {} for {} timed out after {:?}", done.puzzle_id, user, done.elapsed);
            sink.notify(Notification::new(user, GameEvent::TimedOut { answer: done.word }));
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::words::{Difficulty, WordPool};
    use crate::game::events::ChannelSink;
    use crate::game::puzzle::{Puzzle, UserRef};

    struct Fixture {
        session: Arc<Mutex<PuzzleSession>>,
        words: Arc<Mutex<WordBank>>,
        scheduler: DeadlineScheduler,
        events: tokio::sync::mpsc::UnboundedReceiver<Notification>,
    }

    fn fixture() -> Fixture {
        fixture_polling(Duration::from_millis(10))
    }

    fn fixture_polling(poll_interval: Duration) -> Fixture {
        let words = Arc::new(Mutex::new(WordBank::new(WordPool::with_seed(5))));
        let (sink, events) = ChannelSink::channel();
        let scheduler = DeadlineScheduler::new(poll_interval, words.clone(), Arc::new(sink));
        let session = Arc::new(Mutex::new(PuzzleSession::new(UserRef::new(1, 1), "ghost")));
        Fixture { session, words, scheduler, events }
    }

    async fn start(f: &Fixture, duration: Duration) -> PuzzleId {
        let word = f.words.lock().await.draw(Difficulty::Easy).unwrap();
        let puzzle = Puzzle::new(word, "x".into(), Difficulty::Easy, duration, 3, 1);
        let id = puzzle.id;
        let handle = f.scheduler.schedule(f.session.clone(), id);
        f.session.lock().await.begin(puzzle, handle);
        id
    }

    #[tokio::test]
    async fn test_watcher_times_out_puzzle() {
        let mut f = fixture();
        start(&f, Duration::from_millis(30)).await;

        let n = tokio::time::timeout(Duration::from_secs(2), f.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(n.event, GameEvent::TimedOut { .. }));
        assert!(!f.session.lock().await.is_active());
        assert_eq!(f.words.lock().await.active_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_times_out() {
        let mut f = fixture_polling(Duration::ZERO);
        start(&f, Duration::from_millis(20)).await;

        let n = tokio::time::timeout(Duration::from_secs(2), f.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(n.event, GameEvent::TimedOut { .. }));
        assert!(!f.session.lock().await.is_active());
        assert_eq!(f.words.lock().await.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_watcher_never_fires() {
        let mut f = fixture();
        start(&f, Duration::from_millis(40)).await;

        let done = f.session.lock().await.conclude(Outcome::Aborted, &f.words).await;
        assert!(done.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.words.lock().await.active_count(), 0);
    }

    #[tokio::test]
    async fn test_watcher_honours_extended_deadline() {
        let mut f = fixture();
        start(&f, Duration::from_millis(50)).await;
        {
            let mut session = f.session.lock().await;
            let puzzle = session.puzzle.as_mut().unwrap();
            puzzle.extend(Duration::from_millis(200));
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(f.events.try_recv().is_err());
        assert!(f.session.lock().await.is_active());

        let n = tokio::time::timeout(Duration::from_secs(2), f.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(n.event, GameEvent::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_cancel_while_watcher_waits_for_lock() {
        let f = fixture();
        start(&f, Duration::from_millis(10)).await;

        // Hold the lock past the deadline so the watcher blocks on it.
        let mut session = f.session.lock().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let done = session.conclude(Outcome::Success, &f.words).await.unwrap();
        assert_eq!(done.outcome, Outcome::Success);
        drop(session);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(f.words.lock().await.active_count(), 0);
    }
}
