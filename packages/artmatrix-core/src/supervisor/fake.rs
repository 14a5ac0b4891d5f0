//! In-memory process harness for supervisor and orchestrator tests.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::process::{ChildExit, ChildProcess, LaunchSpec, ProcessLauncher};

#[derive(Default)]
struct Inner {
    launches: Vec<Instant>,
    specs: Vec<LaunchSpec>,
    exits: Vec<Option<oneshot::Sender<ChildExit>>>,
    terminated: Vec<bool>,
    fail_spawn: bool,
}

/// Launcher whose children run until the test tells them to exit.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    inner: Arc<Mutex<Inner>>,
}

impl FakeLauncher {
    pub fn failing() -> Self {
        let launcher = Self::default();
        launcher.inner.lock().fail_spawn = true;
        launcher
    }

    pub fn launch_count(&self) -> usize {
        self.inner.lock().launches.len()
    }

    pub fn launch_times(&self) -> Vec<Instant> {
        self.inner.lock().launches.clone()
    }

    pub fn specs(&self) -> Vec<LaunchSpec> {
        self.inner.lock().specs.clone()
    }

    pub fn was_terminated(&self, index: usize) -> bool {
        self.inner.lock().terminated[index]
    }

    /// Makes child `index` exit with `exit`.
    pub fn exit(&self, index: usize, exit: ChildExit) {
        let sender = self.inner.lock().exits[index].take();
        if let Some(sender) = sender {
            let _ = sender.send(exit);
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>> {
        let mut inner = self.inner.lock();
        if inner.fail_spawn {
            return Err(io::Error::new(io::ErrorKind::NotFound, "fake spawn failure"));
        }
        let (tx, rx) = oneshot::channel();
        let index = inner.launches.len();
        inner.launches.push(Instant::now());
        inner.specs.push(spec.clone());
        inner.exits.push(Some(tx));
        inner.terminated.push(false);

        Ok(Box::new(FakeChild {
            pid: 1000 + index as u32,
            index,
            exit_rx: rx,
            exited: None,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct FakeChild {
    pid: u32,
    index: usize,
    exit_rx: oneshot::Receiver<ChildExit>,
    exited: Option<ChildExit>,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        self.exited.is_none().then_some(self.pid)
    }

    async fn wait(&mut self) -> io::Result<ChildExit> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }
        match (&mut self.exit_rx).await {
            Ok(exit) => {
                self.exited = Some(exit);
                Ok(exit)
            }
            Err(_) => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> io::Result<ChildExit> {
        if let Some(exit) = self.exited {
            return Ok(exit);
        }
        self.inner.lock().terminated[self.index] = true;
        let exit = ChildExit::from_signal(15);
        self.exited = Some(exit);
        Ok(exit)
    }
}
