//! Watchdog attributes for tests: a hung test fails with a clear message
//! instead of wedging the whole run.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 45;

fn parse_timeout_secs(attr: TokenStream) -> syn::Result<u64> {
    if attr.is_empty() {
        return Ok(DEFAULT_TIMEOUT_SECS);
    }
    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new(lit.span(), "timeout must be nonzero"));
    }
    Ok(secs)
}

fn strip_test_attrs(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let path = attr.path();
            !(path.is_ident("test")
                || path
                    .segments
                    .last()
                    .is_some_and(|segment| segment.ident == "test"))
        })
        .collect()
}

/// Run a synchronous test on a watchdog thread, failing it after the given
/// number of seconds (default 45).
#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);
    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "use tokio_timeout_test for async test functions",
        )
        .to_compile_error()
        .into();
    }
    let attrs = strip_test_attrs(attrs);

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
            let worker = std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #block));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(std::time::Duration::from_secs(#secs)) {
                Ok(Ok(value)) => {
                    let _ = worker.join();
                    value
                }
                Ok(Err(panic_payload)) => std::panic::resume_unwind(panic_payload),
                Err(_) => panic!("test exceeded its {}s watchdog", #secs),
            }
        }
    }
    .into()
}

/// Run an async test on a current-thread tokio runtime with both a runtime
/// deadline and a watchdog thread (default 45 seconds).
#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let secs = match parse_timeout_secs(attr) {
        Ok(secs) => secs,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);
    if sig.asyncness.take().is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test expects an async test function",
        )
        .to_compile_error()
        .into();
    }
    let attrs = strip_test_attrs(attrs);

    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let deadline = std::time::Duration::from_secs(#secs);
            let (done_tx, done_rx) = std::sync::mpsc::sync_channel(1);
            std::thread::spawn(move || {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("build tokio runtime");
                    runtime.block_on(async {
                        tokio::time::timeout(deadline, async move #block)
                            .await
                            .expect("test exceeded its async deadline")
                    })
                }));
                let _ = done_tx.send(outcome);
            });
            match done_rx.recv_timeout(deadline + std::time::Duration::from_secs(5)) {
                Ok(Ok(value)) => value,
                Ok(Err(panic_payload)) => std::panic::resume_unwind(panic_payload),
                Err(_) => panic!("test exceeded its {}s watchdog", #secs),
            }
        }
    }
    .into()
}
