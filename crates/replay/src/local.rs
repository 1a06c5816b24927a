//! In-process playback through virtual uinput devices.

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, EventType, InputEvent, Key, RelativeAxisType,
    UinputAbsSetup,
};
use tokio::sync::{mpsc, oneshot};

use battbench_common::error::{BattbenchError, BattbenchResult};
use battbench_event_log::{Event, EventKind, EventLogReader};

use crate::player::{EventPlayer, PlayerSignal, SignalReceiver};

/// Key codes exposed by the virtual keyboard. X keycodes are 8..=255,
/// mapping to kernel codes 1..=247.
const MAX_KEY_CODE: u16 = 247;

/// Absolute-axis bounds for the virtual mouse.
const SCREEN_WIDTH: i32 = 2560;
const SCREEN_HEIGHT: i32 = 1440;

/// Where scheduled events land. The production sink is a uinput device
/// pair; tests substitute their own.
pub trait EventSink: Send {
    fn inject(&mut self, event: &Event) -> std::io::Result<()>;
}

struct UinputSink {
    keyboard: VirtualDevice,
    mouse: VirtualDevice,
}

impl EventSink for UinputSink {
    fn inject(&mut self, event: &Event) -> std::io::Result<()> {
        match event.kind {
            EventKind::KeyPress => self
                .keyboard
                .emit(&[InputEvent::new(EventType::KEY, event.detail as u16, 1)]),
            EventKind::KeyRelease => self
                .keyboard
                .emit(&[InputEvent::new(EventType::KEY, event.detail as u16, 0)]),
            EventKind::ButtonPress => self
                .mouse
                .emit(&[InputEvent::new(EventType::KEY, button_code(event.detail), 1)]),
            EventKind::ButtonRelease => self
                .mouse
                .emit(&[InputEvent::new(EventType::KEY, button_code(event.detail), 0)]),
            EventKind::Wheel => self.mouse.emit(&[InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_WHEEL.0,
                event.detail,
            )]),
            EventKind::MotionNotify => self.mouse.emit(&[
                InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, event.x_root),
                InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_Y.0, event.y_root),
            ]),
        }
    }
}

struct Playback {
    stop: Option<oneshot::Sender<()>>,
}

/// Plays logs by writing events to a pair of virtual input devices.
///
/// Construction creates the devices; failure (no `/dev/uinput`, missing
/// privilege) is a construction-time error, never silently degraded.
pub struct LocalPlayer {
    sink: Arc<Mutex<Box<dyn EventSink>>>,
    keyboard_node: Option<String>,
    mouse_node: Option<String>,
    signals: mpsc::UnboundedSender<PlayerSignal>,
    // Cleared by the playback task just before it delivers `Finished`, so
    // a caller reacting to that signal may start the next playback at once.
    playing: Arc<AtomicBool>,
    playback: Option<Playback>,
}

impl LocalPlayer {
    /// Create the virtual keyboard and mouse and resolve their device
    /// nodes. Emits `Ready` on the returned signal channel once both exist.
    pub fn new(name: &str) -> BattbenchResult<(Self, SignalReceiver)> {
        let mut keyboard = build_keyboard(name)?;
        let mut mouse = build_mouse(name)?;

        let keyboard_node = first_dev_node(&mut keyboard)?;
        let mouse_node = first_dev_node(&mut mouse)?;

        tracing::debug!(
            keyboard = %keyboard_node,
            mouse = %mouse_node,
            "Virtual input devices created"
        );

        let (player, receiver) = Self::with_sink(Box::new(UinputSink { keyboard, mouse }));
        Ok((
            Self {
                keyboard_node: Some(keyboard_node),
                mouse_node: Some(mouse_node),
                ..player
            },
            receiver,
        ))
    }

    /// Build a player over a custom injection target. Scheduling and
    /// signal delivery are identical to the uinput player; device nodes
    /// are absent.
    pub fn with_sink(sink: Box<dyn EventSink>) -> (Self, SignalReceiver) {
        let (signals, receiver) = mpsc::unbounded_channel();
        let _ = signals.send(PlayerSignal::Ready);

        (
            Self {
                sink: Arc::new(Mutex::new(sink)),
                keyboard_node: None,
                mouse_node: None,
                signals,
                playing: Arc::new(AtomicBool::new(false)),
                playback: None,
            },
            receiver,
        )
    }
}

impl EventPlayer for LocalPlayer {
    fn is_ready(&self) -> bool {
        true
    }

    fn keyboard_device_node(&self) -> Option<String> {
        self.keyboard_node.clone()
    }

    fn mouse_device_node(&self) -> Option<String> {
        self.mouse_node.clone()
    }

    fn play_fd(&mut self, log: File) -> BattbenchResult<()> {
        assert!(
            !self.playing.swap(true, Ordering::SeqCst),
            "play_fd called while a playback is in flight"
        );

        let sink = Arc::clone(&self.sink);
        let signals = self.signals.clone();
        let playing = Arc::clone(&self.playing);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut reader = EventLogReader::new(BufReader::new(log));
            let start = tokio::time::Instant::now();

            loop {
                // The blocking read is off the scheduling-critical path;
                // pacing comes from the per-event timer below.
                let event = match reader.next_event() {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Error reading event log");
                        break;
                    }
                };

                let deadline = start + Duration::from_millis(u64::from(event.time_ms));
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tokio::time::sleep_until(deadline) => {}
                }

                let result = sink
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .inject(&event);
                if let Err(e) = result {
                    tracing::error!(error = %e, "Can't write event to virtual device");
                    break;
                }
            }

            playing.store(false, Ordering::SeqCst);
            let _ = signals.send(PlayerSignal::Finished);
        });

        self.playback = Some(Playback {
            stop: Some(stop_tx),
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(playback) = &mut self.playback {
            if let Some(stop) = playback.stop.take() {
                // If the playback already finished there is nobody to
                // notify; `Finished` has been delivered either way.
                let _ = stop.send(());
            }
        }
    }
}

fn button_code(ordinal: i32) -> u16 {
    match ordinal {
        1 => Key::BTN_LEFT.code(),
        2 => Key::BTN_MIDDLE.code(),
        _ => Key::BTN_RIGHT.code(),
    }
}

fn build_keyboard(name: &str) -> BattbenchResult<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    for code in 1..=MAX_KEY_CODE {
        keys.insert(Key::new(code));
    }

    let device = uinput_builder()?
        .name(&format!("{name} - simulated keyboard"))
        .with_keys(&keys)
        .map_err(uinput_error)?
        .build()
        .map_err(uinput_error)?;
    Ok(device)
}

fn build_mouse(name: &str) -> BattbenchResult<VirtualDevice> {
    let mut buttons = AttributeSet::<Key>::new();
    buttons.insert(Key::BTN_LEFT);
    buttons.insert(Key::BTN_MIDDLE);
    buttons.insert(Key::BTN_RIGHT);

    let mut wheel = AttributeSet::<RelativeAxisType>::new();
    wheel.insert(RelativeAxisType::REL_WHEEL);

    // 3 units per mm, matching a typical pointing device.
    let abs_x = UinputAbsSetup::new(
        AbsoluteAxisType::ABS_X,
        AbsInfo::new(0, 0, SCREEN_WIDTH, 0, 0, 3),
    );
    let abs_y = UinputAbsSetup::new(
        AbsoluteAxisType::ABS_Y,
        AbsInfo::new(0, 0, SCREEN_HEIGHT, 0, 0, 3),
    );

    let device = uinput_builder()?
        .name(&format!("{name} - simulated mouse"))
        .with_keys(&buttons)
        .map_err(uinput_error)?
        .with_relative_axes(&wheel)
        .map_err(uinput_error)?
        .with_absolute_axis(&abs_x)
        .map_err(uinput_error)?
        .with_absolute_axis(&abs_y)
        .map_err(uinput_error)?
        .build()
        .map_err(uinput_error)?;
    Ok(device)
}

fn uinput_builder<'a>() -> BattbenchResult<VirtualDeviceBuilder<'a>> {
    VirtualDeviceBuilder::new().map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => {
            BattbenchError::permission_denied("Need to be root to simulate events")
        }
        ErrorKind::NotFound => BattbenchError::replay(
            "Can't open /dev/uinput: not found. \
             The kernel may not be compiled with uinput support.",
        ),
        _ => BattbenchError::replay(format!("Can't open /dev/uinput: {e}")),
    })
}

fn uinput_error(e: std::io::Error) -> BattbenchError {
    BattbenchError::replay(format!("Can't create uinput device: {e}"))
}

fn first_dev_node(device: &mut VirtualDevice) -> BattbenchResult<String> {
    let mut nodes = device.enumerate_dev_nodes_blocking().map_err(uinput_error)?;
    match nodes.next() {
        Some(Ok(path)) => Ok(path.to_string_lossy().into_owned()),
        Some(Err(e)) => Err(uinput_error(e)),
        None => Err(BattbenchError::replay(
            "uinput device has no device node".to_string(),
        )),
    }
}
