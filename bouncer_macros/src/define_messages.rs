use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{
    braced, parenthesized, parse_macro_input, punctuated::Punctuated, token, Ident, LitInt,
    LitStr, Result, Token, Type,
};

mod kw {
    syn::custom_keyword!(source);
    syn::custom_keyword!(target);
}

enum MessageArg {
    Source(kw::source),
    Target(kw::target),
    Arg(MessageArgDefn),
}

struct MessageArgDefn {
    name: Ident,
    _colon: Token![:],
    typename: Type,
}

struct MessageDefn {
    numeric: Option<String>,
    typename: Ident,
    args: Punctuated<MessageArg, Token![,]>,
    value: LitStr,
}

struct MessageDefnList {
    messages: Punctuated<MessageDefn, Token![,]>,
}

struct NumericDefnList(MessageDefnList);

impl Parse for MessageArg {
    fn parse(input: ParseStream) -> Result<Self> {
        let lookahead = input.lookahead1();
        if lookahead.peek(kw::source) {
            Ok(Self::Source(input.parse()?))
        } else if lookahead.peek(kw::target) {
            Ok(Self::Target(input.parse()?))
        } else {
            Ok(Self::Arg(input.parse()?))
        }
    }
}

impl Parse for MessageArgDefn {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            name: input.parse()?,
            _colon: input.parse()?,
            typename: input.parse()?,
        })
    }
}

/// Parses the `=> { (args) => "format" }` tail shared by both forms
fn parse_body(
    input: ParseStream,
) -> Result<(Punctuated<MessageArg, Token![,]>, LitStr)> {
    let body;
    let arglist;

    input.parse::<Token![=>]>()?;
    let _brace: token::Brace = braced!(body in input);
    let _paren: token::Paren = parenthesized!(arglist in body);
    let args = arglist.parse_terminated(MessageArg::parse)?;
    body.parse::<Token![=>]>()?;
    let value = body.parse()?;

    Ok((args, value))
}

impl MessageDefn {
    fn parse_message(input: ParseStream) -> Result<Self> {
        let typename: Ident = input.parse()?;
        let (args, value) = parse_body(input)?;

        Ok(Self {
            numeric: None,
            typename,
            args,
            value,
        })
    }

    fn parse_numeric(input: ParseStream) -> Result<Self> {
        let number = input.parse::<LitInt>()?.to_string();

        let name;
        let _paren: token::Paren = parenthesized!(name in input);
        let typename: Ident = name.parse()?;

        let (args, value) = parse_body(input)?;

        Ok(Self {
            numeric: Some(number),
            typename,
            args,
            value,
        })
    }
}

impl Parse for MessageDefnList {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            messages: input.parse_terminated(MessageDefn::parse_message)?,
        })
    }
}

impl Parse for NumericDefnList {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self(MessageDefnList {
            messages: input.parse_terminated(MessageDefn::parse_numeric)?,
        }))
    }
}

pub fn define_messages(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as MessageDefnList);

    generate_message_list(input).into()
}

pub fn define_numerics(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as NumericDefnList);

    generate_message_list(input.0).into()
}

fn generate_message_list(input: MessageDefnList) -> TokenStream2 {
    let mut out = TokenStream2::new();

    for message in input.messages {
        let typename = message.typename;
        let format_str = message.value;

        let mut need_source = message.numeric.is_some();
        let mut need_target = message.numeric.is_some();

        let mut arg_names = Vec::new();
        let mut arg_types = Vec::new();

        for arg in message.args {
            match arg {
                MessageArg::Source(_) => need_source = true,
                MessageArg::Target(_) => need_target = true,
                MessageArg::Arg(defn) => {
                    arg_names.push(defn.name);
                    arg_types.push(defn.typename);
                }
            }
        }

        let (source_arg, source_def) = if need_source {
            (
                Some(quote!(source: &(impl crate::messages::MessageSource + ?Sized), )),
                Some(quote!(source = source.format(), )),
            )
        } else {
            (None, None)
        };

        let (target_arg, target_def) = if need_target {
            (
                Some(quote!(target: &(impl crate::messages::MessageTarget + ?Sized), )),
                Some(quote!(target = target.format(), )),
            )
        } else {
            (None, None)
        };

        let prefix = message
            .numeric
            .as_ref()
            .map(|number| quote!(":{source} ", #number, " {target} ", ));

        out.extend(quote!(
            #[derive(Debug, Clone)]
            pub struct #typename(String);

            impl #typename {
                #[allow(clippy::too_many_arguments)]
                pub fn new(#source_arg #target_arg #( #arg_names: #arg_types ),* ) -> Self {
                    Self(format!(
                        concat!(#prefix #format_str, "\r\n"),
                        #source_def #target_def #( #arg_names = #arg_names ),*
                    ))
                }
            }

            impl std::fmt::Display for #typename {
                fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl crate::messages::OutboundMessage for #typename {
                fn line(&self) -> &str {
                    &self.0
                }
            }
        ));
    }

    out
}
