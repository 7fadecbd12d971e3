// crates/shared/src/macros.rs

/// Declares a toolbelt whose methods run inside the engine process.
#[macro_export]
macro_rules! register_toolbelt {
    (
        $toolbelt_type:ident {
            description: $toolbelt_desc:literal,
            tools: {
                $(
                    $name:literal => $method:ident {
                        description: $desc:literal,
                        params: [$($param_name:literal: $param_type:literal => $param_desc:literal),* $(,)?]
                    }
                ),* $(,)?
            }
        }
    ) => {
        use once_cell::sync::Lazy;

        pub static INSTANCE: Lazy<$toolbelt_type> = Lazy::new(<$toolbelt_type>::default);

        $(
            paste::paste! {
                pub fn [<$method _handler>](args: &$crate::message::Arguments) -> anyhow::Result<String> {
                    INSTANCE.$method(args)
                }
            }
        )*

        paste::paste! {
            pub static TOOL_ENTRIES: &[(&str, $crate::schemas::ToolHandler)] = &[
                $((concat!(stringify!($toolbelt_type), "::", $name), [<$method _handler>])),*
            ];
        }

        pub static TOOL_SCHEMAS: Lazy<Vec<$crate::schemas::ToolSchema>> = Lazy::new(|| vec![
            $(
                $crate::toolbelt_schema!(
                    $toolbelt_type, $name, $desc, $crate::schemas::ToolLocation::Server,
                    [$($param_name: $param_type => $param_desc),*]
                )
            ),*
        ]);

        /// Every tool on this belt, ready for a `ToolRegistry`.
        pub fn tools() -> Vec<std::sync::Arc<dyn $crate::tools::Tool>> {
            TOOL_SCHEMAS
                .iter()
                .zip(TOOL_ENTRIES.iter())
                .map(|(schema, (_, handler))| {
                    std::sync::Arc::new($crate::tools::ToolbeltTool::new(schema.clone(), Some(*handler)))
                        as std::sync::Arc<dyn $crate::tools::Tool>
                })
                .collect()
        }
    };
}

/// Declares a toolbelt that the caller runs on its own host.
///
/// Only schemas are generated. Executing one of these tools in the engine
/// yields `ToolError::RequiresExternalExecution`.
#[macro_export]
macro_rules! declare_client_toolbelt {
    (
        $toolbelt:ident {
            description: $toolbelt_desc:literal,
            tools: {
                $(
                    $name:literal {
                        description: $desc:literal,
                        params: [$($param_name:literal: $param_type:literal => $param_desc:literal),* $(,)?]
                    }
                ),* $(,)?
            }
        }
    ) => {
        pub static TOOL_SCHEMAS: once_cell::sync::Lazy<Vec<$crate::schemas::ToolSchema>> =
            once_cell::sync::Lazy::new(|| vec![
                $(
                    $crate::toolbelt_schema!(
                        $toolbelt, $name, $desc, $crate::schemas::ToolLocation::Client,
                        [$($param_name: $param_type => $param_desc),*]
                    )
                ),*
            ]);

        pub fn tools() -> Vec<std::sync::Arc<dyn $crate::tools::Tool>> {
            TOOL_SCHEMAS
                .iter()
                .map(|schema| {
                    std::sync::Arc::new($crate::tools::ToolbeltTool::new(schema.clone(), None))
                        as std::sync::Arc<dyn $crate::tools::Tool>
                })
                .collect()
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! toolbelt_schema {
    (
        $toolbelt:ident, $name:literal, $desc:literal, $location:expr,
        [$($param_name:literal: $param_type:literal => $param_desc:literal),*]
    ) => {
        $crate::schemas::ToolSchema {
            name: concat!(stringify!($toolbelt), "::", $name),
            description: $desc,
            location: $location,
            parameters: vec![
                $(
                    $crate::schemas::ParameterSchema {
                        name: $param_name,
                        type_name: $param_type,
                        description: $param_desc,
                        required: true,
                    }
                ),*
            ],
        }
    };
}
