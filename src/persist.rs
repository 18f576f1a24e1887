//! Background persistence for the model tree.

use std::sync::Arc;

use crossbeam_channel::{select, Receiver, Sender};
use jod_thread::JoinHandle;

use crate::model::Model;

/// Owns the thread that mirrors the model to disk.
///
/// The model signals the modified channel after every mutation. The
/// channel is bounded at one entry, so a burst of mutations coalesces
/// into a single pending wake-up; the final mutation is still captured
/// because the snapshot is taken after the signal is consumed. Writes
/// go to a temp file that is renamed over the data file, so readers
/// only ever observe complete snapshots.
pub struct SaveWorker {
    /// Signaled on drop so the select loop below wakes up and exits
    /// instead of blocking the join forever.
    shutdown_sender: Sender<()>,

    /// A handle to the worker thread. When dropped, we'll block until
    /// it's done.
    ///
    /// Allowed to be unused because dropping this value has side effects.
    #[allow(unused)]
    job_thread: JoinHandle<()>,
}

impl SaveWorker {
    pub fn start(model: Arc<Model>, modified_receiver: Receiver<()>) -> Self {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);

        let job_thread = jod_thread::Builder::new()
            .name("SaveWorker thread".to_owned())
            .spawn(move || {
                log::trace!("SaveWorker thread started");

                loop {
                    select! {
                        recv(modified_receiver) -> signal => {
                            if signal.is_err() {
                                break;
                            }

                            // IO failures are not fatal: the next
                            // mutation re-signals and the save retries.
                            if let Err(err) = model.save() {
                                log::error!("Failed to save data file: {}", err);
                            }
                        }
                        recv(shutdown_receiver) -> _ => break,
                    }
                }

                log::trace!("SaveWorker thread stopped");
            })
            .expect("Failed to spawn the save worker thread");

        SaveWorker {
            shutdown_sender,
            job_thread,
        }
    }
}

impl Drop for SaveWorker {
    fn drop(&mut self) {
        let _ = self.shutdown_sender.try_send(());
    }
}
