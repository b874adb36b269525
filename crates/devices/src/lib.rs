#![forbid(unsafe_code)]

pub mod ccm;
pub mod gpt;
pub mod sim;
