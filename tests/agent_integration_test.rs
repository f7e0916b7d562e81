//! Agent 运行集成测试（脚本化 LLM，无网络）

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use argent::agent::{Runner, RunnerSettings, Services};
    use argent::commands::builtin_registry;
    use argent::config::ToolsSection;
    use argent::core::{AgentError, UsageLedger};
    use argent::llm::{LlmClient, MockLlmClient};
    use argent::memory::Message;

    const ALL_COMMANDS: [&str; 9] = [
        "WRITE", "DRAW", "REQUEST", "ASSIGN", "RUN", "PYTHON", "SEARCH", "GET", "COMPLETE",
    ];

    async fn runner(root: &Path, mock: &Arc<MockLlmClient>, ledger: &Arc<UsageLedger>) -> Runner {
        let llm: Arc<dyn LlmClient> = mock.clone();
        let services = Services {
            llm,
            registry: Arc::new(builtin_registry(&ToolsSection::default()).unwrap()),
            ledger: Arc::clone(ledger),
        };
        let settings = RunnerSettings {
            runs_root: root.to_path_buf(),
            model: "gpt-4o".into(),
        };
        Runner::new(&settings, services, None).await.unwrap()
    }

    fn last_message(mock: &MockLlmClient, request: usize) -> Message {
        mock.requests()[request].messages.last().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_hello_world_write_then_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("WRITE", r#"{"filename": "hello.txt", "content": "hello world"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "wrote hello.txt"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("Write hello world to hello.txt".into())).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(runner.dir().join("hello.txt")).unwrap(),
            "hello world"
        );
        assert_eq!(mock.call_count(), 2);
        let first = &mock.requests()[0];
        assert!(matches!(first.messages[0], Message::System(_)));
        assert_eq!(
            first.messages.last().unwrap(),
            &Message::tagged_reply("main_goal", "Write hello world to hello.txt")
        );
        assert_eq!(first.functions, ALL_COMMANDS);
        assert_eq!(
            last_message(&mock, 1),
            Message::function_result("WRITE", "Wrote 11 bytes to hello.txt")
        );
    }

    #[tokio::test]
    async fn test_run_creates_directory_in_run_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("RUN", r#"{"content": "mkdir test"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "done"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("create a test directory".into())).await.unwrap();

        assert!(runner.dir().join("test").is_dir());
        assert_eq!(last_message(&mock, 1), Message::function_result("RUN", "stdout: "));
    }

    #[tokio::test]
    async fn test_run_failure_reports_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("RUN", r#"{"content": "echo boom >&2; exit 1"}"#)
                .call("COMPLETE", r#"{"status": "failure", "content": "boom"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("fail".into())).await.unwrap();

        assert_eq!(last_message(&mock, 1), Message::function_result("RUN", "stderr: boom\n"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_get_parse_error_and_another_turn() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("WRITE", "{invalid")
                .call("COMPLETE", r#"{"status": "success", "content": "ok"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("write something".into())).await.unwrap();

        assert_eq!(mock.call_count(), 2);
        match last_message(&mock, 1) {
            Message::System(text) => assert!(text.starts_with("PARSE_ERROR\n"), "{text}"),
            other => panic!("expected a PARSE_ERROR system message, got {other:?}"),
        }
        // 解码失败的命令不会执行
        assert_eq!(std::fs::read_dir(runner.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_is_reported_and_loop_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("FLY", "{}")
                .call("COMPLETE", r#"{"status": "failure", "content": "cannot fly"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("fly".into())).await.unwrap();

        match last_message(&mock, 1) {
            Message::System(text) => assert!(text.starts_with("ERROR\nUnknownCommand"), "{text}"),
            other => panic!("expected an ERROR system message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_without_result_appends_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("PYTHON", r#"{"content": ""}"#)
                .say("thinking")
                .call("COMPLETE", r#"{"status": "success", "content": "ok"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("nothing".into())).await.unwrap();

        assert_eq!(last_message(&mock, 1), Message::call("PYTHON", r#"{"content": ""}"#));
        assert_eq!(last_message(&mock, 2), Message::say("thinking"));
        let results = mock.requests()[2]
            .messages
            .iter()
            .filter(|m| matches!(m, Message::FunctionResult { .. }))
            .count();
        assert_eq!(results, 0);
    }

    #[tokio::test]
    async fn test_assign_blocks_until_child_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call("ASSIGN", r#"{"agent_id": "id", "content": "compute 2+2"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "4"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "the answer is 4"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("compute".into())).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);

        // 第二次调用属于子 Agent：自己的系统提示与任务
        let child = &requests[1].messages;
        assert!(child[1].content().unwrap().contains("name: id"));
        assert!(child[1].content().unwrap().contains("human > main"));
        assert_eq!(
            child.last().unwrap(),
            &Message::tagged_reply("main_goal", "compute 2+2")
        );

        // 父 Agent 在子 Agent 结束后才继续，收到其 COMPLETE 参数
        match requests[2].messages.last().unwrap() {
            Message::FunctionResult { name, content } => {
                assert_eq!(name, "ASSIGN");
                let value: serde_json::Value = serde_json::from_str(content).unwrap();
                assert_eq!(value, serde_json::json!({"status": "success", "content": "4"}));
            }
            other => panic!("expected the child's result, got {other:?}"),
        }
        // 子 Agent 的消息不会混入父 Agent 的日志
        assert!(!requests[2]
            .messages
            .iter()
            .any(|m| m == &Message::tagged_reply("main_goal", "compute 2+2")));
    }

    #[tokio::test]
    async fn test_colliding_agent_ids_get_suffixes() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let complete = r#"{"status": "success", "content": "done"}"#;
        let mock = Arc::new(
            MockLlmClient::new()
                .call("ASSIGN", r#"{"agent_id": "id", "content": "first"}"#)
                .call("COMPLETE", complete)
                .call("ASSIGN", r#"{"agent_id": "id", "content": "second"}"#)
                .call("ASSIGN", r#"{"agent_id": "id", "content": "nested"}"#)
                .call("COMPLETE", complete)
                .call("COMPLETE", complete)
                .call("COMPLETE", complete),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("delegate".into())).await.unwrap();

        let agents = runner.agents();
        let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["main", "id", "id_1", "id_2"]);
        assert_eq!(agents[3].parent.as_deref(), Some("id_1"));
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_llm_failure_ends_the_run() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(MockLlmClient::new().fail("service unavailable"));
        let runner = runner(tmp.path(), &mock, &ledger).await;

        let err = runner.run(Some("anything".into())).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_completion() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(MockLlmClient::new().hang());
        let runner = runner(tmp.path(), &mock, &ledger).await;

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(Some("wait forever".into())).await })
        };
        while mock.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        runner.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(runner.is_stopped());
        assert!(!runner.dir().exists());
    }

    #[tokio::test]
    async fn test_usage_accumulates_per_model() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .with_usage(100, 50)
                .say("planning")
                .call("COMPLETE", r#"{"status": "success", "content": "ok"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("count".into())).await.unwrap();

        let totals = ledger.model_totals("gpt-4o");
        assert_eq!(totals.prompt_tokens, 200);
        assert_eq!(totals.completion_tokens, 100);
        assert_eq!(totals.total_tokens, 300);
        assert!(totals.total_dollars > 0.0);
        assert_eq!(ledger.totals().total_tokens, 300);
    }

    #[tokio::test]
    async fn test_assign_search_role_limits_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(UsageLedger::new());
        let mock = Arc::new(
            MockLlmClient::new()
                .call(
                    "ASSIGN",
                    r#"{"agent_id": "reader", "role": "search", "content": "summarize the notes"}"#,
                )
                .call("RUN", r#"{"content": "cat notes.txt"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "summary"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "done"}"#),
        );
        let runner = runner(tmp.path(), &mock, &ledger).await;

        runner.run(Some("read notes".into())).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[1].functions, vec!["COMPLETE"]);
        assert_eq!(runner.agents()[1].role.as_str(), "search");

        // RUN 不在 search 角色内：写回 ERROR，子 Agent 继续并完成
        match requests[2].messages.last().unwrap() {
            Message::System(text) => assert!(text.starts_with("ERROR\nUnauthorizedCommand"), "{text}"),
            other => panic!("expected an ERROR system message, got {other:?}"),
        }
        assert!(!runner.dir().join("notes.txt").exists());
        match requests[3].messages.last().unwrap() {
            Message::FunctionResult { name, content } => {
                assert_eq!(name, "ASSIGN");
                assert!(content.contains("summary"));
            }
            other => panic!("expected the child's result, got {other:?}"),
        }
    }
}
