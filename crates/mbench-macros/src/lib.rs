use proc_macro::TokenStream;
use quote::quote;
use syn::parse::Parser;
use syn::{parse_macro_input, ImplItem, Item, ItemFn, LitInt, LitStr};

#[derive(Clone, Copy)]
enum Format {
    Table,
    Json,
    JsonPretty,
}

impl Format {
    fn to_tokens(self) -> proc_macro2::TokenStream {
        match self {
            Format::Table => quote!(mbench::Format::Table),
            Format::Json => quote!(mbench::Format::Json),
            Format::JsonPretty => quote!(mbench::Format::JsonPretty),
        }
    }
}

/// Installs the global profiler and flushes it when the function returns.
///
/// The profiler is configured from the environment (`MBENCH`, `MBENCH_CSV`,
/// `MBENCH_SUMMARY`, `MBENCH_JSON`, `MBENCH_TARGET`, `MBENCH_MODE`) and the
/// macro parameters override it. On return the aggregates are saved to the CSV
/// table and, in summary mode, the summary is printed.
///
/// # Parameters
///
/// * `csv` - Path of the CSV table. Default: `MBENCH_CSV` or `mbench_profile.csv`
/// * `format` - Output format as a string: `"table"` (default), `"json"`, or `"json-pretty"`
/// * `summary` - Show cumulative records and print the summary table on exit
///
/// # Examples
///
/// ```rust,no_run
/// #[mbench::main]
/// fn main() {
///     // Your code here
/// }
/// ```
///
/// ```rust,no_run
/// #[mbench::main(csv = "target/profile.csv", format = "json", summary)]
/// fn main() {
///     // Your code here
/// }
/// ```
///
/// With tokio, place `#[tokio::main]` before `#[mbench::main]`:
///
/// ```rust,no_run
/// #[tokio::main]
/// #[mbench::main]
/// async fn main() {
///     // Your code here
/// }
/// ```
///
/// If a global profiler was already installed, it is reused and only flushed.
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    let mut csv: Option<String> = None;
    let mut format: Option<Format> = None;
    let mut summary = false;

    if !attr.is_empty() {
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("csv") {
                let lit: LitStr = meta.value()?.parse()?;
                if lit.value().trim().is_empty() {
                    return Err(meta.error("csv path must not be empty"));
                }
                csv = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("format") {
                let lit: LitStr = meta.value()?.parse()?;
                format =
                    match lit.value().as_str() {
                        "table" => Some(Format::Table),
                        "json" => Some(Format::Json),
                        "json-pretty" => Some(Format::JsonPretty),
                        other => return Err(meta.error(format!(
                            "Unknown format {:?}. Expected one of: \"table\", \"json\", \"json-pretty\"",
                            other
                        ))),
                    };
                return Ok(());
            }

            if meta.path.is_ident("summary") {
                summary = true;
                return Ok(());
            }

            Err(meta.error("Unknown parameter. Supported: csv=\"..\", format=\"..\", summary"))
        });

        if let Err(e) = parser.parse2(proc_macro2::TokenStream::from(attr)) {
            return e.to_compile_error().into();
        }
    }

    let csv_setter = csv.map(|path| quote!(.csv_path(#path)));
    let format_setter = format.map(|format| {
        let format_token = format.to_tokens();
        quote!(.format(#format_token))
    });
    let summary_setter = summary.then(|| quote!(.summary(true)));

    let body = quote! {
        let _mbench_session = {
            let builder = mbench::ProfilerBuilder::from_env()
                #csv_setter
                #format_setter
                #summary_setter;
            mbench::init(builder)
                .unwrap_or_else(|_| mbench::global())
                .session()
        };
        #block
    };

    let wrapped_body = if sig.asyncness.is_some() {
        quote! { async { #body }.await }
    } else {
        body
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #wrapped_body
        }
    };

    output.into()
}

/// Measures every call of a function on the global profiler.
///
/// Each call is sampled before and after the body; the deltas are folded into
/// the aggregate named `module_path::function` and shown through the reporter.
/// The measurement also completes when the function panics.
///
/// # Parameters
///
/// * `min_duration_ms` - Calls shorter than this are recorded but not shown. Default: `0`
/// * `quiet` - Neither show nor record the call
/// * `summary` - Show the cumulative record instead of the single call
/// * `name` - Aggregate name. Default: `module_path::function`
///
/// # Examples
///
/// ```rust,no_run
/// #[mbench::profile]
/// fn parse() {}
///
/// #[mbench::profile(min_duration_ms = 500, summary)]
/// fn train() {}
///
/// #[mbench::profile(name = "io::flush")]
/// async fn flush() {}
/// ```
///
/// When profiling is disabled the function runs without sampling.
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let mut min_duration_ms: u64 = 0;
    let mut quiet = false;
    let mut summary = false;
    let mut name: Option<String> = None;

    if !attr.is_empty() {
        let parser = syn::meta::parser(|meta| {
            if meta.path.is_ident("min_duration_ms") {
                let li: LitInt = meta.value()?.parse()?;
                min_duration_ms = li.base10_parse()?;
                return Ok(());
            }

            if meta.path.is_ident("quiet") {
                quiet = true;
                return Ok(());
            }

            if meta.path.is_ident("summary") {
                summary = true;
                return Ok(());
            }

            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unknown parameter. Supported: min_duration_ms=N, quiet, summary, name=\"..\"",
            ))
        });

        if let Err(e) = parser.parse2(proc_macro2::TokenStream::from(attr)) {
            return e.to_compile_error().into();
        }
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;

    let label = match name {
        Some(name) => quote!(#name),
        None => {
            let fn_name = sig.ident.to_string();
            quote!(concat!(module_path!(), "::", #fn_name))
        }
    };
    let summary_token = if summary {
        quote!(Some(true))
    } else {
        quote!(None)
    };

    let guard_init = quote! {
        let _guard = mbench::ProfileGuard::build(
            #label,
            ::std::time::Duration::from_millis(#min_duration_ms),
            #quiet,
            #summary_token
        );
        #block
    };

    let wrapped = if sig.asyncness.is_some() {
        quote! { async { #guard_init }.await }
    } else {
        guard_init
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #wrapped
        }
    };

    output.into()
}

/// Reports the calls of a function to the global call tracker.
///
/// Every call emits an `enter` and an `exit` event carrying the function's
/// defining module and the module of the innermost tracked caller. Whether the
/// call is recorded depends on the target set with `mbench::profileme!`:
/// callee mode records functions defined in the target module, caller mode
/// records calls made from it.
///
/// Only synchronous functions can be tracked; use
/// [`profile`](macro@profile) for async functions.
///
/// # Examples
///
/// ```rust,no_run
/// mod db {
///     #[mbench::track]
///     pub fn query() {}
/// }
///
/// fn main() {
///     mbench::profileme!(mbench::Mode::Caller);
///     db::query();
///     mbench::shutdown().ok();
/// }
/// ```
#[proc_macro_attribute]
pub fn track(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    if let Some(asyncness) = &input.sig.asyncness {
        return syn::Error::new_spanned(
            asyncness,
            "track supports synchronous functions only, use mbench::profile instead",
        )
        .to_compile_error()
        .into();
    }

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let name = sig.ident.to_string();

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            let _guard = mbench::CallGuard::enter(
                concat!(module_path!(), "::", #name),
                module_path!()
            );
            #block
        }
    };

    output.into()
}

/// Marks a function to be left alone by [`track_all`](macro@track_all).
///
/// # Usage
///
/// ```rust,no_run
/// struct Cache {
///     hits: usize,
/// }
///
/// #[mbench::track_all]
/// impl Cache {
///     fn lookup(&self, key: &str) -> Option<usize> {
///         // This will be tracked
///         key.len().checked_sub(self.hits)
///     }
///
///     #[mbench::skip]
///     fn hits(&self) -> usize {
///         // This will NOT be tracked
///         self.hits
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn skip(_attr: TokenStream, item: TokenStream) -> TokenStream {
    item
}

/// Applies [`track`](macro@track) to every function of a module or impl block.
///
/// Functions marked with [`skip`](macro@skip) and async functions are left
/// uninstrumented.
///
/// # Usage
///
/// ```rust,no_run
/// #[mbench::track_all]
/// mod storage {
///     pub fn read() {}
///
///     pub fn write() {}
/// }
/// ```
#[proc_macro_attribute]
pub fn track_all(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let parsed_item = parse_macro_input!(item as Item);

    match parsed_item {
        Item::Mod(mut module) => {
            if let Some((_brace, items)) = &mut module.content {
                for it in items.iter_mut() {
                    if let Item::Fn(func) = it {
                        if func.sig.asyncness.is_none() && !has_mbench_skip(&func.attrs) {
                            let func_tokens = TokenStream::from(quote!(#func));
                            let transformed = track(TokenStream::new(), func_tokens);
                            *func = syn::parse_macro_input!(transformed as ItemFn);
                        }
                    }
                }
            }
            TokenStream::from(quote!(#module))
        }
        Item::Impl(mut impl_block) => {
            for item in impl_block.items.iter_mut() {
                if let ImplItem::Fn(method) = item {
                    if method.sig.asyncness.is_none() && !has_mbench_skip(&method.attrs) {
                        let func_tokens = TokenStream::from(quote!(#method));
                        let transformed = track(TokenStream::new(), func_tokens);
                        *method = syn::parse_macro_input!(transformed as syn::ImplItemFn);
                    }
                }
            }
            TokenStream::from(quote!(#impl_block))
        }
        other => syn::Error::new_spanned(
            other,
            "track_all can only be applied to modules or impl blocks",
        )
        .to_compile_error()
        .into(),
    }
}

fn has_mbench_skip(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        // #[skip] or #[mbench::skip]
        if attr.path().is_ident("skip")
            || (attr.path().segments.len() == 2
                && attr.path().segments[0].ident == "mbench"
                && attr.path().segments[1].ident == "skip")
        {
            return true;
        }

        // #[cfg_attr(feature = "...", mbench::skip)]
        if attr.path().is_ident("cfg_attr") {
            let attr_str = quote!(#attr).to_string();
            if attr_str.contains("mbench") && attr_str.contains("skip") {
                return true;
            }
        }

        false
    })
}
