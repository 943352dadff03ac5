mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{loopback, Tick};
use courier_core::{ChannelAgent, ChannelListener, CourierError, Result};

struct Counting(Arc<AtomicUsize>);

impl ChannelListener<Tick> for Counting {
    fn on_message(&self, _agent: &ChannelAgent<Tick>, _message: &Tick) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counter() -> (Arc<AtomicUsize>, Counting) {
    let count = Arc::new(AtomicUsize::new(0));
    (count.clone(), Counting(count))
}

#[tokio::test]
async fn fan_out_reaches_every_listener_once() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("fanout")?;

    let mut counts = Vec::new();
    for _ in 0..3 {
        let agent = channel.new_agent()?;
        for _ in 0..4 {
            let (count, listener) = counter();
            agent.add_listener(listener)?;
            counts.push(count);
        }
    }

    channel.send(&Tick::new(1)).await?;

    assert_eq!(counts.len(), 12);
    assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    assert_eq!(channel.stats().delivered, 12);
    Ok(())
}

#[tokio::test]
async fn two_agents_each_listener_invoked_once() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("evt")?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let agent_a = channel.new_agent()?;
    let agent_b = channel.new_agent()?;
    for (agent, name) in [(&agent_a, "L1"), (&agent_a, "L2"), (&agent_b, "L3")] {
        let seen = seen.clone();
        agent.add_listener_fn(move |_agent, tick: &Tick| {
            seen.lock().unwrap().push((name, tick.seq));
            Ok(())
        })?;
    }

    channel.send(&Tick::new(7)).await?;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![("L1", 7), ("L2", 7), ("L3", 7)]);
    Ok(())
}

#[tokio::test]
async fn failing_listener_does_not_starve_others() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("isolation")?;

    let agent = channel.new_agent()?;
    agent.add_listener_fn(|_agent, _tick: &Tick| Err(CourierError::Listener("always fails".into())))?;
    agent.add_listener_fn(|_agent, tick: &Tick| {
        if tick.seq % 2 == 0 {
            panic!("listener exploded on {}", tick.seq);
        }
        Ok(())
    })?;
    let (same_agent, listener) = counter();
    agent.add_listener(listener)?;

    let other = channel.new_agent()?;
    let (other_agent, listener) = counter();
    other.add_listener(listener)?;

    for seq in 0..5 {
        channel.send(&Tick::new(seq)).await?;
    }

    assert_eq!(same_agent.load(Ordering::SeqCst), 5);
    assert_eq!(other_agent.load(Ordering::SeqCst), 5);
    // 5 errors + 3 panics
    assert_eq!(channel.stats().listener_failures, 8);
    Ok(())
}

#[tokio::test]
async fn closed_agent_receives_nothing() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("closing")?;

    let agent = channel.new_agent()?;
    let (count, listener) = counter();
    agent.add_listener(listener)?;
    let retained = agent.clone();

    channel.send(&Tick::new(1)).await?;
    assert!(agent.close());
    assert!(!agent.close());
    channel.send(&Tick::new(2)).await?;

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(retained.is_closed());
    assert!(!retained.has_listeners());
    assert_eq!(channel.agent_count(), 0);
    assert!(matches!(
        retained.add_listener_fn(|_agent, _tick: &Tick| Ok(())),
        Err(CourierError::AgentClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn listener_closing_own_agent_stops_siblings() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("self-close")?;

    let agent = channel.new_agent()?;
    agent.add_listener_fn(|agent, _tick: &Tick| {
        agent.close();
        Ok(())
    })?;
    let (count, listener) = counter();
    agent.add_listener(listener)?;

    channel.send(&Tick::new(1)).await?;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn listener_added_during_dispatch_waits_for_next_message() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("late-join")?;
    let late = Arc::new(AtomicUsize::new(0));

    let agent = channel.new_agent()?;
    let late_count = late.clone();
    agent.add_listener_fn(move |agent, tick: &Tick| {
        if tick.seq == 1 {
            let late_count = late_count.clone();
            agent.add_listener_fn(move |_agent, _tick: &Tick| {
                late_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })?;
        }
        Ok(())
    })?;

    channel.send(&Tick::new(1)).await?;
    assert_eq!(late.load(Ordering::SeqCst), 0);
    channel.send(&Tick::new(2)).await?;
    assert_eq!(late.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn listener_added_to_another_agent_during_dispatch_waits() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("cross-join")?;
    let late = Arc::new(AtomicUsize::new(0));

    let agent_a = channel.new_agent()?;
    let agent_b = channel.new_agent()?;
    for (agent, other) in [(&agent_a, agent_b.clone()), (&agent_b, agent_a.clone())] {
        let late = late.clone();
        agent.add_listener_fn(move |_agent, tick: &Tick| {
            if tick.seq == 1 {
                let late = late.clone();
                other.add_listener_fn(move |_agent, _tick: &Tick| {
                    late.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })?;
            }
            Ok(())
        })?;
    }

    channel.send(&Tick::new(1)).await?;
    assert_eq!(late.load(Ordering::SeqCst), 0);
    channel.send(&Tick::new(2)).await?;
    assert_eq!(late.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn removed_listener_is_not_called() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("removal")?;

    let agent = channel.new_agent()?;
    let (count, listener) = counter();
    let id = agent.add_listener(listener)?;
    assert_eq!(agent.listeners(), vec![id]);

    assert!(agent.remove_listener(id));
    assert!(!agent.remove_listener(id));
    channel.send(&Tick::new(1)).await?;

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(agent.listener_count(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_payload_is_dropped() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("garbled")?;
    let agent = channel.new_agent()?;
    let (count, listener) = counter();
    agent.add_listener(listener)?;

    messenger.register_incoming_message("garbled", b"{not json");
    assert_eq!(count.load(Ordering::SeqCst), 0);

    channel.send(&Tick::new(2)).await?;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let stats = channel.stats();
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.received, 2);
    assert_eq!(stats.delivered, 1);
    Ok(())
}

#[tokio::test]
async fn messages_arrive_in_send_order() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("ordered")?;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let agent = channel.new_agent()?;
    let sink = seen.clone();
    agent.add_listener_fn(move |_agent, tick: &Tick| {
        sink.lock().unwrap().push(tick.seq);
        Ok(())
    })?;

    for seq in 0..20 {
        channel.send(&Tick::new(seq)).await?;
    }
    assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test]
async fn concurrent_ingress_delivers_everything() -> Result<()> {
    let (messenger, _transport) = loopback().await;
    let channel = messenger.channel::<Tick>("busy")?;
    let agent = channel.new_agent()?;
    let (count, listener) = counter();
    agent.add_listener(listener)?;

    let payload = serde_json::to_vec(&Tick::new(1))?;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let messenger = messenger.clone();
            let payload = payload.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    messenger.register_incoming_message("busy", &payload);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(count.load(Ordering::SeqCst), 400);
    Ok(())
}
