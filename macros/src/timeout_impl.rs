use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{
    Error, Expr, ItemFn, Lit, LitStr, Path, Result, ReturnType, Type, parse::Parse,
    parse::ParseStream, parse_quote, parse2,
};

pub fn timeout(attr: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let attr: TimeoutArgs = parse2(attr)?;
    let mut func: ItemFn = parse2(item)?;
    if let Some(asyncness) = func.sig.asyncness {
        return Err(Error::new(
            asyncness.span,
            "timeout only supports synchronous functions",
        ));
    }

    let duration = attr.into_duration_expr()?;
    let block = func.block;
    let on_timeout = if returns_result(&func.sig.output) {
        quote!(return ::core::result::Result::Err(::core::convert::Into::into(err)))
    } else {
        quote!(panic!("{}", err))
    };
    let wrapped = quote!({
        let __deadline: ::std::time::Duration = #duration;
        match ::altlive::utils::timer::with_timeout(move || #block, __deadline) {
            ::core::result::Result::Ok(value) => value,
            ::core::result::Result::Err(err) => #on_timeout,
        }
    });
    func.block = Box::new(parse_quote!(#wrapped));
    Ok(quote!(#func))
}

struct TimeoutArgs {
    duration: Expr,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.is_empty() {
            return Err(Error::new(Span::call_site(), "timeout duration is required"));
        }
        let duration = input.parse()?;
        if !input.is_empty() {
            return Err(input.error("expected a single duration"));
        }
        Ok(Self { duration })
    }
}

impl TimeoutArgs {
    fn into_duration_expr(self) -> Result<TokenStream> {
        match self.duration {
            Expr::Lit(expr) => match expr.lit {
                Lit::Str(lit) => parse_duration_literal(&lit),
                lit => Err(Error::new(
                    lit.span(),
                    "expected a string literal such as \"500ms\" or a `Duration`",
                )),
            },
            expr => Ok(quote!(#expr)),
        }
    }
}

fn returns_result(output: &ReturnType) -> bool {
    let ReturnType::Type(_, ty) = output else {
        return false;
    };
    let Type::Path(ty) = ty.as_ref() else {
        return false;
    };
    is_result_path(&ty.path)
}

fn is_result_path(path: &Path) -> bool {
    path.segments
        .last()
        .is_some_and(|segment| segment.ident == "Result")
}

fn parse_duration_literal(lit: &LitStr) -> Result<TokenStream> {
    let raw = lit.value();
    let s = raw.trim();
    let (number, millis_per_unit) = if let Some(number) = s.strip_suffix("ms") {
        (number, 1)
    } else if let Some(number) = s.strip_suffix('s') {
        (number, 1000)
    } else {
        return Err(Error::new(
            lit.span(),
            "duration literal needs a `ms` or `s` suffix",
        ));
    };
    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| Error::new(lit.span(), "duration must be a whole number"))?;
    let millis = value
        .checked_mul(millis_per_unit)
        .ok_or_else(|| Error::new(lit.span(), "duration is too large"))?;
    Ok(quote!(::std::time::Duration::from_millis(#millis)))
}
