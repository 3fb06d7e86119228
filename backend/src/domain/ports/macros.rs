//! Generates the error enums returned by port traits.
//!
//! Each variant gets a snake_case constructor whose arguments accept
//! anything convertible into the field type, so adapters can write
//! `RequestStoreError::query(err.to_string())` or pass a `&str` directly.
//! Fields may carry their own attributes, typically doc comments.

macro_rules! define_port_error {
    (@ctor $variant:ident) => {
        ::paste::paste! {
            #[doc = "Build the `" $variant "` variant."]
            #[must_use]
            pub fn [<$variant:snake>]() -> Self {
                Self::$variant
            }
        }
    };
    (@ctor $variant:ident { $($field:ident : $ty:ty),* }) => {
        ::paste::paste! {
            #[doc = "Build the `" $variant "` variant."]
            #[must_use]
            pub fn [<$variant:snake>]($($field: impl Into<$ty>),*) -> Self {
                Self::$variant { $($field: $field.into()),* }
            }
        }
    };
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident $( {
                    $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),* $(,)?
                } )? => $message:expr
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant $( { $( $(#[$field_meta])* $field : $ty ),* } )?,
            )*
        }

        impl $name {
            $(
                define_port_error!(@ctor $variant $( { $($field : $ty),* } )?);
            )*
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    define_port_error! {
        pub enum LedgerPortError {
            Offline => "ledger offline",
            Missing { id: i64 } => "request #{id} missing",
            Rejected {
                /// Why the ledger refused.
                reason: String,
                id: i64,
            } => "request #{id} rejected: {reason}",
        }
    }

    #[rstest]
    fn unit_variants_get_nullary_constructors() {
        assert_eq!(LedgerPortError::offline(), LedgerPortError::Offline);
    }

    #[rstest]
    fn string_fields_accept_borrowed_text() {
        let err = LedgerPortError::rejected("checksum differs", 7_i64);
        assert_eq!(err.to_string(), "request #7 rejected: checksum differs");
    }

    #[rstest]
    fn numeric_fields_keep_their_type() {
        assert_eq!(
            LedgerPortError::missing(42_i64),
            LedgerPortError::Missing { id: 42 }
        );
    }
}
