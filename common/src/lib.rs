pub mod clock;
pub mod controls;
pub mod device;
pub mod schedule;
pub mod settings;
pub mod timer;
pub mod types;
pub mod web;

pub use clock::{SystemClock, UtcTime, WallClock};
pub use controls::{check_power_on_reset, poll_controls, ControlEvent, ControlInputs};
pub use schedule::{in_on_zone, localize, ClockTime, ScheduleEvaluator, TimerOutcome, TimerTask};
pub use settings::{factory_defaults, ConfigStore, LoadOutcome, MemoryMedium, NvMedium, StoreError};
pub use timer::{elapsed_ticks, MonotonicTimer, TickSource};
pub use types::{ConnectivityMode, LightStatus, RuntimeState};
pub use web::{handle_action, ActionOutcome, FormAction, Page, PageContext};
