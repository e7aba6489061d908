//! End-to-end delivery scenarios between nodes.

use std::sync::Arc;

use threadpost_node::{
    Collaborators, Config, MemoryBlockStore, MemoryThreads, MockRelayOutbox, MockTransport, Node,
    PeerStore, Pointer, PointerStore, ThreadRegistry,
};
use threadpost_types::{
    BlockPayload, Cid, CidList, Envelope, Keypair, Message, MessageType, OfflineAck, Payload,
    SignedThreadBlock, ThreadBlock, ThreadBlockType,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct TestNode {
    node: Node,
    transport: MockTransport,
    relay: MockRelayOutbox,
    threads: Arc<MemoryThreads>,
    blocks: Arc<MemoryBlockStore>,
}

async fn test_node(transport: MockTransport) -> TestNode {
    let relay = MockRelayOutbox::new();
    let threads = Arc::new(MemoryThreads::new());
    let blocks = Arc::new(MemoryBlockStore::new());
    let collaborators = Collaborators {
        transport: Arc::new(transport.clone()),
        relay: Arc::new(relay.clone()),
        threads: threads.clone(),
        blocks: blocks.clone(),
    };
    let node = Node::open(Config::in_memory(), Keypair::generate(), collaborators)
        .await
        .unwrap();
    TestNode {
        node,
        transport,
        relay,
        threads,
        blocks,
    }
}

#[tokio::test]
async fn offline_flush_relays_known_inboxes_and_keeps_the_rest() {
    init_tracing();
    let sender = test_node(MockTransport::offline()).await;
    let p1 = Keypair::generate().peer_id();
    let p2 = Keypair::generate().peer_id();
    sender
        .node
        .store()
        .set_inboxes(&p1, &["inbox-1".to_string()])
        .await
        .unwrap();

    for nonce in 0..3 {
        let ping = Message::new(Payload::Ping(threadpost_types::Ping { nonce }));
        sender.node.send(p1, ping.clone()).await.unwrap();
        sender.node.send(p2, ping).await.unwrap();
    }

    let report = sender.node.outbox().flush().await;

    assert_eq!(report.relayed, 3);
    assert_eq!(report.pending, 3);
    let handoffs = sender.relay.handoffs();
    assert_eq!(handoffs.len(), 3);
    assert!(handoffs
        .iter()
        .all(|h| h.peer == p1 && h.inboxes == vec!["inbox-1".to_string()]));
    assert_eq!(sender.node.outbox().pending().await.unwrap(), 3);

    // Once P2 registers an inbox, the next flush drains it.
    sender
        .node
        .store()
        .set_inboxes(&p2, &["inbox-2".to_string()])
        .await
        .unwrap();
    let report = sender.node.outbox().flush().await;
    assert_eq!(report.relayed, 3);
    assert_eq!(sender.node.outbox().pending().await.unwrap(), 0);
}

#[tokio::test]
async fn relay_rejection_leaves_queue_intact_until_it_recovers() {
    init_tracing();
    let sender = test_node(MockTransport::offline()).await;
    let peer = Keypair::generate().peer_id();
    sender
        .node
        .store()
        .set_inboxes(&peer, &["inbox".to_string()])
        .await
        .unwrap();
    for nonce in 0..5 {
        let ping = Message::new(Payload::Ping(threadpost_types::Ping { nonce }));
        sender.node.send(peer, ping).await.unwrap();
    }

    sender.relay.reject(Some("relay down"));
    sender.node.outbox().flush().await;
    assert_eq!(sender.node.outbox().pending().await.unwrap(), 5);

    sender.relay.reject(None);
    sender.node.outbox().flush().await;
    assert_eq!(sender.node.outbox().pending().await.unwrap(), 0);
    assert_eq!(sender.relay.handoffs_for(&peer).len(), 5);
}

#[tokio::test]
async fn connected_peer_receives_directly_and_replies() {
    init_tracing();
    let transport = MockTransport::new();
    let alice = test_node(transport.clone()).await;
    let bob = test_node(MockTransport::new()).await;
    transport.connect(bob.node.peer_id());

    let ping = Message::new(Payload::Ping(threadpost_types::Ping { nonce: 77 }));
    alice.node.send(bob.node.peer_id(), ping.clone()).await.unwrap();
    let report = alice.node.outbox().flush().await;
    assert_eq!(report.direct, 1);

    let delivered = alice.transport.sent_to(&bob.node.peer_id());
    assert_eq!(delivered.len(), 1);
    let raw = delivered[0].to_bytes().unwrap();
    assert_eq!(bob.node.receive(&raw).await.unwrap(), Some(ping));
}

#[tokio::test]
async fn invite_over_relay_then_photo_and_ack() {
    init_tracing();
    let alice = test_node(MockTransport::offline()).await;
    let bob = test_node(MockTransport::offline()).await;
    let cafe = Keypair::generate();
    let bob_id = bob.node.peer_id();
    let bob_key = bob.node.identity().public_key();

    // Alice owns a thread and invites Bob while he is offline.
    let thread_key = Keypair::generate();
    let invite = ThreadBlock::invite(&bob_id, &bob_key, &thread_key, vec![]).unwrap();
    let invite =
        SignedThreadBlock::sign(&thread_key, alice.node.identity(), "holiday", &invite).unwrap();
    let thread_id = invite.thread_id;
    alice
        .node
        .store()
        .set_inboxes(&bob_id, &["cafe-inbox".to_string()])
        .await
        .unwrap();
    alice
        .node
        .send(bob_id, Message::new(Payload::ThreadBlock(invite)))
        .await
        .unwrap();
    assert_eq!(alice.node.outbox().flush().await.relayed, 1);

    // The cafe seals what it holds to Bob and delivers it when he is back.
    let held = alice.relay.handoffs_for(&bob_id).remove(0).envelope;
    let relay = Message::relay(&bob_key, &held).unwrap();
    let raw = Envelope::seal(&cafe, relay).unwrap().to_bytes().unwrap();
    assert_eq!(bob.node.receive(&raw).await.unwrap(), None);

    let thread = bob.threads.lookup(&thread_id).await.unwrap();
    assert_eq!(thread.name, "holiday");
    let members = bob.node.store().thread_peers(&thread_id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].peer_id, alice.node.peer_id());

    // A photo signed with the thread key now applies on top of the invite.
    let parents = bob.threads.chain(&thread_id);
    let photo = ThreadBlock::content(ThreadBlockType::Photo, "photo-1", parents);
    let photo =
        SignedThreadBlock::sign(&thread_key, alice.node.identity(), "holiday", &photo).unwrap();
    let photo_id = photo.id;
    let raw = Envelope::seal(alice.node.identity(), Message::new(Payload::ThreadBlock(photo)))
        .unwrap()
        .to_bytes()
        .unwrap();
    bob.node.receive(&raw).await.unwrap();
    assert_eq!(bob.threads.chain(&thread_id).last(), Some(&photo_id));

    // Replaying the invite must not recreate the thread.
    let relay = Message::relay(&bob_key, &held).unwrap();
    let raw = Envelope::seal(&cafe, relay).unwrap().to_bytes().unwrap();
    let reply = bob.node.receive(&raw).await.unwrap().unwrap();
    match reply.payload {
        Some(Payload::Error(notice)) => assert!(notice.message.contains("already exists")),
        other => panic!("expected error reply, got {:?}", other),
    }
    assert_eq!(bob.threads.len(), 1);
}

#[tokio::test]
async fn store_negotiation_then_block_transfer() {
    init_tracing();
    let bob = test_node(MockTransport::new()).await;
    let alice = Keypair::generate();

    let have = BlockPayload::for_data(b"already here".to_vec());
    let want_a = BlockPayload::for_data(b"block a".to_vec());
    let want_c = BlockPayload::for_data(b"block c".to_vec());
    let raw = Envelope::seal(&alice, Message::new(Payload::Block(have.clone())))
        .unwrap()
        .to_bytes()
        .unwrap();
    bob.node.receive(&raw).await.unwrap();

    let offer = Message::new(Payload::CidList(CidList {
        cids: vec![want_a.cid.clone(), have.cid.clone(), want_c.cid.clone()],
    }));
    let raw = Envelope::seal(&alice, offer).unwrap().to_bytes().unwrap();
    let reply = bob.node.receive(&raw).await.unwrap().unwrap();
    assert_eq!(reply.message_type().unwrap(), MessageType::Store);
    assert_eq!(
        reply.payload,
        Some(Payload::CidList(CidList {
            cids: vec![want_a.cid.clone(), want_c.cid.clone()],
        }))
    );

    for block in [want_a, want_c] {
        let raw = Envelope::seal(&alice, Message::new(Payload::Block(block)))
            .unwrap()
            .to_bytes()
            .unwrap();
        bob.node.receive(&raw).await.unwrap();
    }
    assert_eq!(bob.blocks.len(), 3);
    assert!(bob.blocks.get(&Cid::for_data(b"block c")).is_some());
}

#[tokio::test]
async fn offline_ack_only_from_the_canceller() {
    init_tracing();
    let bob = test_node(MockTransport::new()).await;
    let alice = Keypair::generate();
    let mallory = Keypair::generate();

    for who in [&alice, &mallory] {
        bob.node
            .store()
            .add_pointer(&Pointer {
                peer_id: who.peer_id(),
                address: "cafe".into(),
                cancel_id: Some(alice.peer_id()),
                created_at: 0,
            })
            .await
            .unwrap();
    }

    let ack = |who: &Keypair| {
        Envelope::seal(
            who,
            Message::new(Payload::OfflineAck(OfflineAck::for_peer(&who.peer_id()))),
        )
        .unwrap()
        .to_bytes()
        .unwrap()
    };

    assert!(bob.node.receive(&ack(&mallory)).await.is_err());
    assert!(bob
        .node
        .store()
        .get_pointer(&mallory.peer_id())
        .await
        .unwrap()
        .is_some());

    bob.node.receive(&ack(&alice)).await.unwrap();
    assert!(bob
        .node
        .store()
        .get_pointer(&alice.peer_id())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn connectivity_change_wakes_the_flush_task() {
    init_tracing();
    let transport = MockTransport::offline();
    let alice = test_node(transport.clone()).await;
    let bob = Keypair::generate().peer_id();
    let handle = alice.node.spawn_flush_task();

    let ping = Message::new(Payload::Ping(threadpost_types::Ping { nonce: 1 }));
    alice.node.send(bob, ping).await.unwrap();

    transport.set_online(true);
    transport.connect(bob);
    alice.node.connectivity_changed();

    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while alice.node.outbox().pending().await.unwrap() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("flush task should deliver after connectivity change");

    assert_eq!(alice.transport.sent_to(&bob).len(), 1);
    handle.abort();
}
