pub mod audio;
pub mod notifier;
pub mod process;
pub mod side_effects;

pub use audio::AudioPlayer;
pub use notifier::{CommandNotifier, LogNotifier};
pub use side_effects::CommandSideEffects;
