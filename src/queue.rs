//! Per-channel serialization of updates.
//!
//! Each channel gets one worker task fed by two bounded queues: updates we
//! initiate and updates the counterparty initiates. Only one update of a
//! channel is processed at a time. When both sides compete, the side that
//! would occupy the lower nonce goes first. A running update of ours that
//! loses against an arriving counterparty update is cancelled, the
//! counterparty update runs once it has stopped. A losing update that has not
//! started yet runs after the winner, on top of the state the winner left.

use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error};

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The worker of the channel is gone.
    #[error("update queue closed")]
    Closed,

    /// Both sides would occupy the same nonce.
    #[error("both sides predict nonce {0}")]
    InvariantViolation(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A unit of work. It must stop without persisting anything once the token
/// is cancelled.
pub type Job<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, T> + Send>;

/// What arbitration needs to know about the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationView {
    pub nonce: u64,
    pub self_is_alice: bool,
}

#[async_trait]
pub trait NonceView: Send + Sync + fmt::Debug {
    async fn arbitration_view(&self) -> Result<ArbitrationView, StoreError>;
}

/// Nonce the next update of a party would get if it was the one to update.
/// Alice owns the odd nonces, bob the even ones.
pub fn predicted_nonce(current: u64, is_alice: bool) -> u64 {
    let next = current + 1;
    if (next % 2 == 1) == is_alice {
        next
    } else {
        next + 1
    }
}

struct Pending<T> {
    job: Job<T>,
    reply: oneshot::Sender<Result<T, QueueError>>,
}

fn respond<T>(reply: oneshot::Sender<Result<T, QueueError>>, result: Result<T, QueueError>) {
    // The caller may have given up waiting.
    let _ = reply.send(result);
}

/// Handle to the worker of one channel. `S` is the result of self-initiated
/// jobs, `O` the one of counterparty-initiated jobs.
///
/// The worker terminates when the handle is dropped.
pub struct SerializedQueue<S, O> {
    mine: mpsc::Sender<Pending<S>>,
    theirs: mpsc::Sender<Pending<O>>,
    _abort: DropGuard,
}

impl<S, O> fmt::Debug for SerializedQueue<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedQueue")
            .field("mine_capacity", &self.mine.capacity())
            .field("theirs_capacity", &self.theirs.capacity())
            .finish()
    }
}

impl<S, O> SerializedQueue<S, O>
where
    S: Send + 'static,
    O: Send + 'static,
{
    /// Spawns the worker. Must be called within a tokio runtime.
    pub fn spawn(view: Arc<dyn NonceView>, backlog: usize) -> Self {
        let (mine, mine_rx) = mpsc::channel(backlog.max(1));
        let (theirs, theirs_rx) = mpsc::channel(backlog.max(1));
        let cancel = CancellationToken::new();

        let worker = Worker {
            view,
            mine: mine_rx,
            theirs: theirs_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            mine,
            theirs,
            _abort: cancel.drop_guard(),
        }
    }

    /// Runs a self-initiated job once it is our turn.
    pub async fn execute_self(&self, job: Job<S>) -> Result<S, QueueError> {
        let (reply, response) = oneshot::channel();
        self.mine
            .send(Pending { job, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        response.await.map_err(|_| QueueError::Closed)?
    }

    /// Runs a counterparty-initiated job once it is their turn.
    pub async fn execute_other(&self, job: Job<O>) -> Result<O, QueueError> {
        let (reply, response) = oneshot::channel();
        self.theirs
            .send(Pending { job, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        response.await.map_err(|_| QueueError::Closed)?
    }
}

struct Worker<S, O> {
    view: Arc<dyn NonceView>,
    mine: mpsc::Receiver<Pending<S>>,
    theirs: mpsc::Receiver<Pending<O>>,
    cancel: CancellationToken,
}

enum Next<S, O> {
    Mine(Pending<S>),
    Theirs(Pending<O>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Own,
    Theirs,
}

impl<S, O> Worker<S, O>
where
    S: Send + 'static,
    O: Send + 'static,
{
    async fn run(mut self) {
        loop {
            let next = tokio::select! {
                () = self.cancel.cancelled() => break,
                Some(mine) = self.mine.recv() => Next::Mine(mine),
                Some(theirs) = self.theirs.recv() => Next::Theirs(theirs),
                else => break,
            };

            match next {
                Next::Mine(mine) => match self.theirs.try_recv() {
                    Ok(theirs) => self.arbitrate(mine, theirs).await,
                    Err(_) => self.run_own(mine).await,
                },
                Next::Theirs(theirs) => match self.mine.try_recv() {
                    Ok(mine) => self.arbitrate(mine, theirs).await,
                    Err(_) => run_alone(theirs).await,
                },
            }
        }
        debug!("update queue terminated");
    }

    /// Both sides are waiting, nothing runs yet.
    async fn arbitrate(&mut self, mine: Pending<S>, theirs: Pending<O>) {
        match self.priority().await {
            Ok(Side::Own) => {
                run_alone(mine).await;
                run_alone(theirs).await;
            }
            Ok(Side::Theirs) => {
                run_alone(theirs).await;
                self.run_own(mine).await;
            }
            Err(e) => {
                respond(mine.reply, Err(e.clone()));
                respond(theirs.reply, Err(e));
            }
        }
    }

    /// Runs our job while watching for counterparty jobs. One that takes
    /// priority cancels ours and runs after it stopped.
    async fn run_own(&mut self, mine: Pending<S>) {
        let Pending { job, reply } = mine;
        let cancel = CancellationToken::new();
        let mut own = job(cancel.clone());

        let theirs = tokio::select! {
            result = &mut own => {
                respond(reply, Ok(result));
                return;
            }
            Some(theirs) = self.theirs.recv() => theirs,
        };

        match self.priority().await {
            Ok(Side::Own) => {
                debug!("counterparty update waits for ours");
                respond(reply, Ok(own.await));
                run_alone(theirs).await;
            }
            Ok(Side::Theirs) => {
                debug!("counterparty update preempts ours");
                cancel.cancel();
                respond(reply, Ok(own.await));
                run_alone(theirs).await;
            }
            Err(e) => {
                respond(theirs.reply, Err(e));
                respond(reply, Ok(own.await));
            }
        }
    }

    async fn priority(&self) -> Result<Side, QueueError> {
        let view = self.view.arbitration_view().await?;
        let own = predicted_nonce(view.nonce, view.self_is_alice);
        let theirs = predicted_nonce(view.nonce, !view.self_is_alice);
        if own == theirs {
            error!(nonce = view.nonce, predicted = own, "both sides predict the same nonce");
            return Err(QueueError::InvariantViolation(own));
        }

        let side = if own < theirs { Side::Own } else { Side::Theirs };
        debug!(nonce = view.nonce, own, theirs, winner = ?side, "arbitrating concurrent updates");
        Ok(side)
    }
}

async fn run_alone<T>(pending: Pending<T>) {
    let Pending { job, reply } = pending;
    respond(reply, Ok(job(CancellationToken::new()).await));
}
