//! Built-in event for `--test`

pub const TEST_EVENT: &str = r#"{
    "project": "myproject",
    "issue": "345",
    "entry": "e74181f56c9bdcf09f3b9451a2b962ef7c67ae48",
    "author": "fred",
    "isNew": false,
    "users": {
        "fred": "admin",
        "john": "rw"
    },
    "modified": ["owner", "description"],
    "properties": {
        "summary": ["Title", "segfault at startup if no space left on device"],
        "status": ["Status", "open"],
        "owner": ["Owner", "John Smith"],
        "description": ["Description", "A segfault occurs when:\n1. ...\n2. ...\n3. ...\n4. four added"]
    },
    "message": "John, please analyse this issue. Sample code 't.c' supplied.",
    "files": ["2e344bf4afba3ce778448c0bca4b7037a9487c5a/t.c"],
    "old_issue": {
        "properties": {
            "owner": ["fred"],
            "summary": ["segfault at startup if no space left on device"]
        }
    },
    "recipients": [
        {"email": "bob@example.com"},
        {"email": "alice@example.com", "gpg_pub_key": ""}
    ]
}"#;
