extern crate proc_macro;

use proc_macro::TokenStream;

mod define_messages;

/// Define a set of outbound protocol messages.
///
/// Each entry has the form `Name => { (args...) => "format string" }`, where the
/// argument list may contain the bare keywords `source` and `target` in addition
/// to `name: Type` pairs. Generates a `pub struct Name(String)` with a `new`
/// constructor taking the declared arguments, plus `Display` and
/// `OutboundMessage` implementations.
#[proc_macro]
pub fn define_messages(input: TokenStream) -> TokenStream {
    define_messages::define_messages(input)
}

/// Define a set of numeric replies.
///
/// Entries have the form `324(ChannelModeIs) => { (args...) => "format" }`. The
/// generated line is always prefixed by `:{source} NNN {target} `, so every
/// constructor takes a source and a target before the declared arguments.
#[proc_macro]
pub fn define_numerics(input: TokenStream) -> TokenStream {
    define_messages::define_numerics(input)
}
