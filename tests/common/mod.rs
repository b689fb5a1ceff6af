//! Shared test harness: a worker spawner that runs the real worker loop
//! over in-memory channels, with injectable compiler/runtime seams. The
//! driver-side pump and the worker speak the same protocol as the
//! production process pool; only the transport differs.

use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use fluidml::profiler::{
    serve, Compiler, ProfileError, Runtime, WorkerConfig, WorkerIo, WorkerLink, WorkerReply,
    WorkerRequest, WorkerSpawner, WorkerState,
};

/// Spawns protocol-speaking workers in-process around the given seams.
pub struct MockSpawner {
    pub compiler: Arc<dyn Compiler>,
    pub runtime: Arc<dyn Runtime>,
}

impl WorkerSpawner for MockSpawner {
    fn spawn(&self, config: &WorkerConfig) -> Result<Box<dyn WorkerLink>, ProfileError> {
        let (request_tx, request_rx) = channel();
        let (reply_tx, reply_rx) = channel();
        let state = WorkerState {
            config: config.clone(),
            compiler: Arc::clone(&self.compiler),
            runtime: Arc::clone(&self.runtime),
        };
        let worker = std::thread::spawn(move || {
            let mut io = ChannelIo {
                requests: request_rx,
                replies: reply_tx,
            };
            // serve reports its own failure over the channel
            let _ = serve(&state, &mut io);
        });
        Ok(Box::new(ChannelLink {
            requests: Some(request_tx),
            replies: reply_rx,
            worker: Some(worker),
        }))
    }
}

struct ChannelIo {
    requests: Receiver<WorkerRequest>,
    replies: Sender<WorkerReply>,
}

impl WorkerIo for ChannelIo {
    fn send(&mut self, reply: WorkerReply) -> io::Result<()> {
        self.replies
            .send(reply)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "driver gone"))
    }

    fn recv(&mut self) -> io::Result<WorkerRequest> {
        self.requests
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "driver gone"))
    }
}

struct ChannelLink {
    requests: Option<Sender<WorkerRequest>>,
    replies: Receiver<WorkerReply>,
    worker: Option<JoinHandle<()>>,
}

impl WorkerLink for ChannelLink {
    fn send(&mut self, request: &WorkerRequest) -> io::Result<()> {
        match &self.requests {
            Some(sender) => sender
                .send(request.clone())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker gone")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker shut down")),
        }
    }

    fn recv(&mut self) -> io::Result<WorkerReply> {
        self.replies
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "worker gone"))
    }

    fn shutdown(&mut self) {
        // Dropping the sender unblocks the worker's recv.
        self.requests = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
