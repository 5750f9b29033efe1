//! Records emitted tracing events so tests can assert on their level.

use std::sync::{Arc, Mutex};

use tracing::{
    field::{Field, Visit},
    subscriber::DefaultGuard,
    Event, Level, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
    Layer,
};

#[derive(Clone, Default)]
pub(crate) struct LevelRecorder(Arc<Mutex<Vec<(Level, String)>>>);

impl LevelRecorder {
    /// Install as the thread's default subscriber until the guard drops.
    pub(crate) fn install() -> (Self, DefaultGuard) {
        let recorder = Self::default();
        let guard = tracing_subscriber::registry()
            .with(recorder.clone())
            .set_default();
        (recorder, guard)
    }

    /// Level of every event whose message is `message`.
    pub(crate) fn levels_of(&self, message: &str) -> Vec<Level> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| m == message)
            .map(|(level, _)| *level)
            .collect()
    }
}

struct Message(String);

impl Visit for Message {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LevelRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = Message(String::new());
        event.record(&mut message);
        self.0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), message.0));
    }
}
