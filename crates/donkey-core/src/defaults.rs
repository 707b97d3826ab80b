//! Values installed when the gate creates a missing chat configuration.

pub const DEFAULT_PROVIDER: &str = "Blackbox";
pub const DEFAULT_LANGUAGE_MODEL: &str = "gpt-4o";
pub const DEFAULT_IMAGE_MODEL: &str = "flux";
pub const DEFAULT_STREAMING: bool = false;
pub const DEFAULT_INSTRUCTIONS: &str = "Hey there, I'm Smart Donkey! I'm here to help you out. \
I'm pretty good at understanding things, so don't be shy to ask anything!";
