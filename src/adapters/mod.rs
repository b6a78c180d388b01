// Adapters layer: concrete implementations of the domain ports (browser, captcha service, Telegram)

pub mod captcha;
pub mod telegram;
pub mod webdriver;
