//! Defines Stagger's AMQP 1.0 interface. The server only ever publishes:
//! peers attach a receiver whose source address names the event path of
//! the subtree they care about (or the `events` wildcard), and every
//! model change at that path becomes one message on the link.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread;

use fe2o3_amqp::acceptor::{
    ConnectionAcceptor, LinkAcceptor, LinkEndpoint, ListenerConnectionHandle,
    ListenerSessionHandle, SessionAcceptor,
};
use fe2o3_amqp::types::messaging::{ApplicationProperties, Message, Properties};
use fe2o3_amqp::types::primitives::{Binary, SimpleValue, Symbol};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::events::{EventReceiver, ObjectUpdate};

/// Subscribing here delivers every update regardless of its path.
const WILDCARD_ADDRESS: &str = "events";

/// Outbound buffer per link. A subscriber that stops granting credit
/// stops draining its buffer; once it fills, further updates are
/// dropped for that link only.
const LINK_QUEUE_DEPTH: usize = 16;

/// `{address → {link name → outbound queue}}`, shared by the accept
/// path (registration) and the event dispatch path (fan-out).
type Subscriptions = Arc<Mutex<HashMap<String, HashMap<String, mpsc::Sender<Arc<ObjectUpdate>>>>>>;

pub struct AmqpServer {
    address: SocketAddr,
    events: EventReceiver,
}

impl AmqpServer {
    pub fn new(address: SocketAddr, events: EventReceiver) -> Self {
        AmqpServer { address, events }
    }

    /// Spawns the dedicated AMQP thread: a single-threaded runtime that
    /// owns all connection, session, and link state.
    pub fn start(self) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("amqp-server".to_owned())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        log::error!("Failed to build the AMQP runtime: {}", err);
                        return;
                    }
                };

                rt.block_on(run(self.address, self.events));
            })
            .expect("Failed to spawn the AMQP server thread")
    }
}

async fn run(address: SocketAddr, mut events: EventReceiver) {
    let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));

    let listener = match TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("Failed to bind AMQP listener on {}: {}", address, err);
            return;
        }
    };

    log::info!("Listening for AMQP connections on amqp://{}", address);

    tokio::spawn(accept_loop(listener, Arc::clone(&subscriptions)));

    while let Some(update) = events.recv().await {
        deliver(&subscriptions, Arc::new(update));
    }
}

async fn accept_loop(listener: TcpListener, subscriptions: Subscriptions) {
    let connection_acceptor = ConnectionAcceptor::new("stagger");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("Failed to accept AMQP connection: {}", err);
                continue;
            }
        };

        let connection = match connection_acceptor.accept(stream).await {
            Ok(connection) => connection,
            Err(err) => {
                log::warn!("AMQP open handshake failed for {}: {}", peer, err);
                continue;
            }
        };

        log::info!("Opened AMQP connection from {}", peer);
        tokio::spawn(serve_connection(connection, Arc::clone(&subscriptions)));
    }
}

async fn serve_connection(mut connection: ListenerConnectionHandle, subscriptions: Subscriptions) {
    let session_acceptor = SessionAcceptor::new();

    while let Ok(session) = session_acceptor.accept(&mut connection).await {
        tokio::spawn(serve_session(session, Arc::clone(&subscriptions)));
    }

    log::info!("Closed AMQP connection");
}

async fn serve_session(mut session: ListenerSessionHandle, subscriptions: Subscriptions) {
    let link_acceptor = LinkAcceptor::new();

    loop {
        match link_acceptor.accept(&mut session).await {
            // The peer attached a receiver, so we hold the sending end:
            // this is a subscription.
            Ok(LinkEndpoint::Sender(sender)) => {
                let address = sender
                    .source()
                    .as_ref()
                    .and_then(|source| source.address.clone())
                    .unwrap_or_default();
                let address = address.trim_start_matches('/').to_owned();
                let link_name = sender.name().to_owned();

                let (queue_sender, queue_receiver) = mpsc::channel(LINK_QUEUE_DEPTH);
                subscriptions
                    .lock()
                    .unwrap()
                    .entry(address.clone())
                    .or_default()
                    .insert(link_name.clone(), queue_sender);

                log::info!("Subscribed link '{}' at '{}'", link_name, address);

                tokio::spawn(pump_link(
                    sender,
                    queue_receiver,
                    address,
                    link_name,
                    Arc::clone(&subscriptions),
                ));
            }

            // Stagger never receives; refuse incoming sender links.
            Ok(LinkEndpoint::Receiver(receiver)) => {
                log::warn!("Refusing an incoming publishing link");
                let _ = receiver.close().await;
            }

            Err(_) => break,
        }
    }
}

/// Forwards queued updates onto one subscriber link until the peer
/// detaches or a send fails.
async fn pump_link(
    mut sender: fe2o3_amqp::Sender,
    mut queue: mpsc::Receiver<Arc<ObjectUpdate>>,
    address: String,
    link_name: String,
    subscriptions: Subscriptions,
) {
    loop {
        let update = tokio::select! {
            update = queue.recv() => match update {
                Some(update) => update,
                None => break,
            },

            // Watch for detach too, or a link closed on a quiet path
            // stays in the table until its next send.
            _ = sender.on_detach() => {
                log::info!("Link '{}' detached by peer", link_name);
                break;
            }
        };

        // The body is a bare data section holding the JSON bytes, so
        // consumers see inferred content rather than an amqp-value
        // wrapper.
        let message = Message::builder()
            .properties(
                Properties::builder()
                    .content_type(Symbol::from("application/json"))
                    .build(),
            )
            .application_properties(
                ApplicationProperties::builder()
                    .insert("type", SimpleValue::String(update.type_name.to_owned()))
                    .insert("path", SimpleValue::String(update.path.clone()))
                    .build(),
            )
            .data(Binary::from(update.json.to_vec()))
            .build();

        if let Err(err) = sender.send(message).await {
            log::info!("Send on link '{}' failed, unsubscribing: {}", link_name, err);
            break;
        }

        log::debug!("Sent update for {} on link '{}'", update.path, link_name);
    }

    unsubscribe(&subscriptions, &address, &link_name);

    // Completes the detach handshake when the peer initiated it.
    let _ = sender.close().await;
}

fn unsubscribe(subscriptions: &Subscriptions, address: &str, link_name: &str) {
    let mut table = subscriptions.lock().unwrap();

    if let Some(links) = table.get_mut(address) {
        links.remove(link_name);

        if links.is_empty() {
            table.remove(address);
        }
    }

    log::info!("Unsubscribed link '{}' from '{}'", link_name, address);
}

/// Fans one update out to every link subscribed at its exact path and
/// to the wildcard address.
fn deliver(subscriptions: &Subscriptions, update: Arc<ObjectUpdate>) {
    let table = subscriptions.lock().unwrap();

    for address in [update.path.as_str(), WILDCARD_ADDRESS] {
        let Some(links) = table.get(address) else {
            continue;
        };

        for (link_name, queue) in links {
            match queue.try_send(Arc::clone(&update)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!(
                        "Link '{}' has no credit, dropping update for {}",
                        link_name,
                        update.path
                    );
                }
                // The pump task is unwinding; it unregisters itself.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}
