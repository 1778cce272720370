use chan::{self, Sender, Receiver};


/// Forward each received message to every subscriber, so gateways and tests
/// observe the same event stream the orchestrator emits.
pub struct Broadcast<A: Clone> {
    rx:          Receiver<A>,
    subscribers: Vec<Sender<A>>,
}

impl<A: Clone> Broadcast<A> {
    pub fn new(rx: Receiver<A>) -> Broadcast<A> {
        Broadcast { rx: rx, subscribers: Vec::new() }
    }

    /// Forward messages until the sending side hangs up.
    pub fn run(&self) {
        while let Some(msg) = self.rx.recv() {
            for subscriber in &self.subscribers {
                subscriber.send(msg.clone());
            }
        }
    }

    /// Subscribe to all subsequent messages.
    pub fn subscribe(&mut self) -> Receiver<A> {
        let (tx, rx) = chan::async::<A>();
        self.subscribers.push(tx);
        rx
    }
}


#[cfg(test)]
mod tests {
    use chan;
    use std::thread;

    use super::*;


    #[test]
    fn all_subscribers_see_each_message() {
        let (tx, rx) = chan::sync(0);
        let mut broadcast = Broadcast::new(rx);
        let one = broadcast.subscribe();
        let two = broadcast.subscribe();
        thread::spawn(move || broadcast.run());

        tx.send(123);
        assert_eq!(123, one.recv().unwrap());
        assert_eq!(123, two.recv().unwrap());
    }
}
