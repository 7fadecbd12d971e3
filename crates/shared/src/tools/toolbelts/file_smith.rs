use crate::declare_client_toolbelt;

declare_client_toolbelt! {
    FileSmith {
        description: "Tool for reading and writing files in the user's workspace",
        tools: {
            "read_file" {
                description: "Reads the entire contents of a file and returns it as a string",
                params: ["path": "string" => "Path to the file to read"]
            },
            "write_file" {
                description: "Writes content to a file, overwriting existing content",
                params: [
                    "path": "string" => "Path to the file to write",
                    "content": "string" => "Content to write to the file"
                ]
            },
            "list_directory" {
                description: "Lists all files and directories in the specified directory. Returns JSON array of names.",
                params: ["path": "string" => "Path to the directory to list (defaults to current directory)"]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Arguments;
    use crate::tools::ToolError;
    use serde_json::json;

    #[tokio::test]
    async fn every_tool_defers_to_the_client() {
        let tools = tools();
        assert_eq!(tools.len(), 3);

        let mut args = Arguments::new();
        args.insert("path".into(), json!("x"));
        for tool in &tools {
            assert!(tool.requires_permission());
            let err = tool.execute(&args).await.unwrap_err();
            assert!(matches!(err, ToolError::RequiresExternalExecution { tool: ref name } if name == tool.name()));
        }
    }

    #[test]
    fn write_file_declares_both_parameters() {
        let write = tools().into_iter().find(|t| t.name() == "FileSmith::write_file").unwrap();
        assert_eq!(write.id(), "filesmith.write_file");
        assert_eq!(write.parameters_schema()["required"], json!(["path", "content"]));
    }
}
