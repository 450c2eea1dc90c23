/// Keep-alive cadence.
///
/// A relay stops streaming to clients it has not heard from, so a background thread sends one
/// frame per tick. Which frame is decided by a [`KeepAliveCycle`]: tick `i` looks up position
/// `i mod len` and sends PING wherever the table is silent.
use std::{
    collections::BTreeMap,
    sync::{Arc, Condvar, Mutex, PoisonError, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info, warn};

use crate::{
    protocol::{
        keepalive::{KeepAlive, MessageKind},
        WireMsg,
    },
    transport::DatagramSink,
    AnemResult, Error,
};

//   ____           _
//  / ___|   _  ___| | ___
// | |  | | | |/ __| |/ _ \
// | |__| |_| | (__| |  __/
//  \____\__, |\___|_|\___|
//       |___/

/// Ordered mapping of cycle position to message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveCycle {
    len: usize,
    table: BTreeMap<usize, MessageKind>,
}

impl Default for KeepAliveCycle {
    /// Five ticks, POLL first, PING otherwise.
    fn default() -> Self {
        Self::new(5).with(0, MessageKind::Poll)
    }
}

impl KeepAliveCycle {
    /// A cycle of `len` ticks that sends only PING. `len` is at least one.
    pub fn new(len: usize) -> Self {
        Self {
            len: len.max(1),
            table: BTreeMap::new(),
        }
    }

    /// Send `kind` at `position`, taken modulo the cycle length.
    pub fn with(mut self, position: usize, kind: MessageKind) -> Self {
        self.table.insert(position % self.len, kind);
        self
    }

    pub fn cycle_len(&self) -> usize {
        self.len
    }

    pub fn kind_at(&self, tick: u64) -> MessageKind {
        let position = (tick % self.len as u64) as usize;
        self.table
            .get(&position)
            .copied()
            .unwrap_or(MessageKind::Ping)
    }

    /// Configured (non-default) positions in order.
    pub fn positions(&self) -> impl Iterator<Item = (usize, MessageKind)> + '_ {
        self.table.iter().map(|(p, k)| (*p, *k))
    }
}

//  ____  _           _      _
// / ___|| |__  _   _| |_ __| | _____      ___ __
// \___ \| '_ \| | | | __/ _` |/ _ \ \ /\ / / '_ \
//  ___) | | | | |_| | || (_| | (_) \ V  V /| | | |
// |____/|_| |_|\__,_|\__\__,_|\___/ \_/\_/ |_| |_|

#[derive(Debug, Default)]
struct Flag {
    triggered: Mutex<bool>,
    cond: Condvar,
    parent: Option<Arc<Flag>>,
    children: Mutex<Vec<Weak<Flag>>>,
}

impl Flag {
    fn is_set(&self) -> bool {
        let own = *self.triggered.lock().unwrap_or_else(PoisonError::into_inner);
        own || self.parent.as_ref().is_some_and(|p| p.is_set())
    }

    /// Notify waiters on this flag and on every live descendant. Never holds a parent lock while
    /// taking a child lock; waiters take them in the opposite order.
    fn wake(&self) {
        {
            let _guard = self.triggered.lock().unwrap_or_else(PoisonError::into_inner);
            self.cond.notify_all();
        }
        let children: Vec<Arc<Flag>> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            child.wake();
        }
    }
}

/// Cancellation signal shared by the scheduler and the dispatcher.
///
/// A child token reports triggered when either it or an ancestor is, and an ancestor's trigger
/// wakes the child's waiters too.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<Flag>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        let flag = Arc::new(Flag {
            parent: Some(Arc::clone(&self.flag)),
            ..Default::default()
        });
        let mut children = self
            .flag
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&flag));
        Self { flag }
    }

    pub fn trigger(&self) {
        *self
            .flag
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.flag.wake();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.is_set()
    }

    /// Sleep for `timeout` unless triggered first. Returns whether the token is triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let parent_set = || self.flag.parent.as_ref().is_some_and(|p| p.is_set());
        let guard = self
            .flag
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .flag
            .cond
            .wait_timeout_while(guard, timeout, |triggered| !*triggered && !parent_set())
            .unwrap_or_else(PoisonError::into_inner);
        let own = *guard;
        drop(guard);
        own || parent_set()
    }
}

//  ____       _              _       _
// / ___|  ___| |__   ___  __| |_   _| | ___ _ __
// \___ \ / __| '_ \ / _ \/ _` | | | | |/ _ \ '__|
//  ___) | (__| | | |  __/ (_| | |_| | |  __/ |
// |____/ \___|_| |_|\___|\__,_|\__,_|_|\___|_|

pub struct KeepAliveScheduler<S> {
    sink: S,
    cycle: KeepAliveCycle,
    interval: Duration,
    session_id: Option<u16>,
    label: String,
}

impl<S: DatagramSink> KeepAliveScheduler<S> {
    pub fn new(sink: S, cycle: KeepAliveCycle, interval: Duration) -> Self {
        let label = sink
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        Self {
            sink,
            cycle,
            interval,
            session_id: None,
            label,
        }
    }

    pub fn with_session_id(mut self, session_id: Option<u16>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Send the frame for tick `tick`.
    pub fn tick(&self, tick: u64) -> AnemResult<MessageKind> {
        let kind = self.cycle.kind_at(tick);
        let mut frame = KeepAlive::new(kind);
        if let Some(id) = self.session_id {
            frame = frame.with_session_id(id);
        }
        self.sink.send(&frame.to_bytes())?;
        info!("{} - {}", self.label, frame.label());
        Ok(kind)
    }

    /// Tick until `shutdown` is triggered. A transient send failure skips the tick; any other
    /// failure trips `shutdown` and is returned.
    pub fn run(self, shutdown: &Shutdown) -> AnemResult<()> {
        let mut tick: u64 = 0;
        while !shutdown.is_triggered() {
            match self.tick(tick) {
                Ok(_) => {}
                Err(e) if e.is_transient() => warn!("keep-alive send failed: {e}"),
                Err(e) => {
                    error!("keep-alive send failed: {e}");
                    shutdown.trigger();
                    return Err(e);
                }
            }
            tick = tick.wrapping_add(1);
            if shutdown.wait_timeout(self.interval) {
                break;
            }
        }
        debug!("keep-alive stopped after {} ticks", tick);
        Ok(())
    }
}

impl<S: DatagramSink + 'static> KeepAliveScheduler<S> {
    pub fn spawn(self, shutdown: Shutdown) -> AnemResult<JoinHandle<AnemResult<()>>> {
        thread::Builder::new()
            .name("keep-alive".into())
            .spawn(move || self.run(&shutdown))
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{Arc, Mutex},
        time::Instant,
    };

    use super::*;
    use crate::lazy_init_tracing;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_after: Option<usize>,
        /// Fails once with `Interrupted` when this many frames were sent.
        hiccup_at: Arc<Mutex<Option<usize>>>,
    }

    impl DatagramSink for Recorder {
        fn send(&self, bytes: &[u8]) -> AnemResult<usize> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_after.is_some_and(|n| sent.len() >= n) {
                return Err(io::Error::from(io::ErrorKind::ConnectionRefused).into());
            }
            let mut hiccup = self.hiccup_at.lock().unwrap();
            if *hiccup == Some(sent.len()) {
                *hiccup = None;
                return Err(io::Error::from(io::ErrorKind::Interrupted).into());
            }
            sent.push(bytes.to_vec());
            Ok(bytes.len())
        }
    }

    #[test]
    fn test_default_cycle() {
        let cycle = KeepAliveCycle::default();
        let kinds: Vec<_> = (0..10).map(|i| cycle.kind_at(i)).collect();
        use MessageKind::*;
        assert_eq!(
            kinds,
            vec![Poll, Ping, Ping, Ping, Ping, Poll, Ping, Ping, Ping, Ping]
        );
    }

    #[test]
    fn test_cycle_counts() {
        let cycle = KeepAliveCycle::new(10)
            .with(0, MessageKind::Poll)
            .with(5, MessageKind::Info);
        let k = 7;
        let kinds: Vec<_> = (0..(k * cycle.cycle_len() as u64))
            .map(|i| cycle.kind_at(i))
            .collect();
        let count = |kind| kinds.iter().filter(|k| **k == kind).count();
        assert_eq!(count(MessageKind::Poll), k as usize);
        assert_eq!(count(MessageKind::Info), k as usize);
        assert_eq!(count(MessageKind::Ping), 8 * k as usize);

        // Within every cycle the configured kinds appear in position order.
        for chunk in kinds.chunks(cycle.cycle_len()) {
            let configured: Vec<_> = chunk
                .iter()
                .enumerate()
                .filter(|(_, k)| **k != MessageKind::Ping)
                .collect();
            assert_eq!(
                configured,
                vec![(0, &MessageKind::Poll), (5, &MessageKind::Info)]
            );
        }
        assert_eq!(
            cycle.positions().collect::<Vec<_>>(),
            vec![(0, MessageKind::Poll), (5, MessageKind::Info)]
        );
    }

    #[test]
    fn test_cycle_edges() {
        let cycle = KeepAliveCycle::new(0).with(3, MessageKind::Info);
        assert_eq!(cycle.cycle_len(), 1);
        assert_eq!(cycle.kind_at(0), MessageKind::Info);
        assert_eq!(cycle.kind_at(u64::MAX), MessageKind::Info);

        let cycle = KeepAliveCycle::new(4).with(6, MessageKind::Poll);
        assert_eq!(cycle.kind_at(2), MessageKind::Poll);
    }

    #[test]
    fn test_tick_frames() {
        let recorder = Recorder::default();
        let scheduler = KeepAliveScheduler::new(
            recorder.clone(),
            KeepAliveCycle::default(),
            Duration::from_secs(1),
        )
        .with_session_id(Some(0x0102));
        assert_eq!(scheduler.tick(0).unwrap(), MessageKind::Poll);
        assert_eq!(scheduler.tick(1).unwrap(), MessageKind::Ping);
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x01, 0x02, 0x01]);
        assert_eq!(sent[1], vec![0x01, 0x02, b'P', b'I', b'N', b'G']);
    }

    #[test]
    fn test_run_until_shutdown() {
        lazy_init_tracing();
        let recorder = Recorder::default();
        let shutdown = Shutdown::new();
        let handle = KeepAliveScheduler::new(
            recorder.clone(),
            KeepAliveCycle::default(),
            Duration::from_millis(5),
        )
        .spawn(shutdown.clone())
        .unwrap();
        while recorder.sent.lock().unwrap().len() < 6 {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.trigger();
        handle.join().unwrap().unwrap();
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x01]);
        assert_eq!(sent[5], vec![0x01]);
        assert!(sent[1..5].iter().all(|f| f == b"PING"));
    }

    #[test]
    fn test_send_failure_trips_shutdown() {
        let recorder = Recorder {
            fail_after: Some(2),
            ..Default::default()
        };
        let shutdown = Shutdown::new();
        let err = KeepAliveScheduler::new(
            recorder.clone(),
            KeepAliveCycle::default(),
            Duration::from_millis(1),
        )
        .run(&shutdown)
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(shutdown.is_triggered());
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_transient_send_failure_skips_tick() {
        lazy_init_tracing();
        let recorder = Recorder {
            hiccup_at: Arc::new(Mutex::new(Some(2))),
            ..Default::default()
        };
        let shutdown = Shutdown::new();
        let handle = KeepAliveScheduler::new(
            recorder.clone(),
            KeepAliveCycle::default(),
            Duration::from_millis(2),
        )
        .spawn(shutdown.clone())
        .unwrap();
        while recorder.sent.lock().unwrap().len() < 5 {
            thread::sleep(Duration::from_millis(2));
        }
        shutdown.trigger();
        handle.join().unwrap().unwrap();

        // Tick 2 was lost, so the POLL at tick 5 lands at index 4.
        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent[0], vec![0x01]);
        assert!(sent[1..4].iter().all(|f| f == b"PING"));
        assert_eq!(sent[4], vec![0x01]);
        assert!(recorder.hiccup_at.lock().unwrap().is_none());
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_child_shutdown() {
        let parent = Shutdown::new();
        let child = parent.child();
        child.trigger();
        assert!(child.is_triggered());
        assert!(!parent.is_triggered());

        let child = parent.child();
        parent.trigger();
        assert!(child.is_triggered());
        assert!(child.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_parent_trigger_wakes_child_waiter() {
        let parent = Shutdown::new();
        let grandchild = parent.child().child();
        let start = Instant::now();
        let handle = thread::spawn(move || grandchild.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        parent.trigger();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
