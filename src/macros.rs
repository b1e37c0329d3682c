// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

/// Declare a protocol vocabulary: an enum of verbs together with a
/// case-insensitive lookup from wire bytes.
///
/// ```ignore
/// verbs! {
///     pub enum Verb {
///         Noop = "NOOP",
///         Quit = "QUIT",
///     }
/// }
///
/// assert_eq!(Verb::classify(b"nOoP"), Some(Verb::Noop));
/// ```
#[macro_export]
macro_rules! verbs {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Look up a verb, ignoring ASCII case
            $vis fn classify(verb: &[u8]) -> Option<Self> {
                $(
                    if verb.eq_ignore_ascii_case($text.as_bytes()) {
                        return Some($name::$variant);
                    }
                )+
                None
            }

            /// Canonical (upper case) spelling of this verb
            $vis fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
