mod delay;
mod haptics;
mod navigate;

pub use self::delay::{Delay, DelayOperation};
pub use self::haptics::{Haptics, HapticsOperation};
pub use self::navigate::{Navigate, NavigateOperation};

// Render and Http come straight from Crux; they already provide everything
// this app needs for view updates and the two remote services.
pub use crux_core::render::Render;
pub use crux_http::Http;

use crate::app::{App, Event};

pub type AppHttp = Http<Event>;
pub type AppRender = Render<Event>;
pub type AppDelay = Delay<Event>;
pub type AppHaptics = Haptics<Event>;
pub type AppNavigate = Navigate<Event>;

#[derive(crux_macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub delay: Delay<Event>,
    pub haptics: Haptics<Event>,
    pub navigate: Navigate<Event>,
}
