//! HTTP-based integration tests for the chain, signer, identity and point-source clients.
//!
//! Uses `wiremock` to stand in for the JSON-RPC node and the platform services.

use secrecy::SecretString;
use serde_json::json;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use wallet_reward_reconciler::domain::{
    AppError, BlockchainError, ChainClient, ExternalServiceError, IdentityDirectory, RewardPlugin,
    WalletType,
};
use wallet_reward_reconciler::infra::blockchain::UnsignedTransaction;
use wallet_reward_reconciler::infra::{
    HttpIdentityDirectory, HttpRewardPlugin, HttpTransactionSigner, RpcChainClient,
    RpcClientConfig, TransactionSigner,
};

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

fn rpc_error(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": { "code": code, "message": message }
    }))
}

fn fast_retries() -> RpcClientConfig {
    RpcClientConfig {
        timeout: Duration::from_secs(5),
        max_retries: 2,
        retry_delay: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

// ============================================================================
// JSON-RPC CHAIN CLIENT TESTS
// ============================================================================

mod chain_client_tests {
    use super::*;

    const HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000AB";
    const FROM: &str = "0x00000000000000000000000000000000000000F1";

    #[tokio::test]
    async fn test_block_number_and_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_blockNumber" })))
            .respond_with(rpc_result(json!("0x1b4")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getBlockByNumber",
                "params": ["0x1b4", false]
            })))
            .respond_with(rpc_result(json!({
                "number": "0x1b4",
                "hash": "0xblock",
                "transactions": [HASH]
            })))
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        assert_eq!(client.block_number().await.unwrap(), 436);

        let block = client.block(436).await.unwrap().expect("block exists");
        assert_eq!(block.number, 436);
        assert_eq!(block.transaction_hashes, vec![HASH.to_lowercase()]);
    }

    #[tokio::test]
    async fn test_transaction_and_receipt_are_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionByHash" })))
            .respond_with(rpc_result(json!({
                "hash": HASH,
                "from": FROM,
                "to": null,
                "nonce": "0x7",
                "value": "0xde0b6b3a7640000",
                "gasPrice": "0x3b9aca00",
                "input": "0x",
                "blockNumber": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_getTransactionReceipt" })))
            .respond_with(rpc_result(json!({
                "transactionHash": HASH,
                "blockNumber": "0x10",
                "status": "0x0",
                "gasUsed": "0x5208",
                "effectiveGasPrice": "0x3b9aca00"
            })))
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();

        let tx = client.transaction(HASH).await.unwrap().unwrap();
        assert_eq!(tx.hash, HASH.to_lowercase());
        assert_eq!(tx.from, FROM.to_lowercase());
        assert_eq!(tx.nonce, 7);
        assert_eq!(tx.value, 1_000_000_000_000_000_000);
        assert_eq!(tx.gas_price, 1_000_000_000);
        assert_eq!(tx.block_number, None);

        let receipt = client.receipt(HASH).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 16);
        assert!(!receipt.status);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.effective_gas_price, Some(1_000_000_000));
    }

    #[tokio::test]
    async fn test_unknown_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        assert!(client.receipt(HASH).await.unwrap().is_none());
        assert!(client.transaction(HASH).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_count_and_send_raw() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_getTransactionCount",
                "params": [FROM, "latest"]
            })))
            .respond_with(rpc_result(json!("0x2a")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_sendRawTransaction",
                "params": ["0xf86c"]
            })))
            .respond_with(rpc_result(json!(HASH)))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        assert_eq!(client.transaction_count(FROM).await.unwrap(), 42);
        assert_eq!(
            client.send_raw_transaction("0xf86c").await.unwrap(),
            HASH.to_lowercase()
        );
    }

    #[tokio::test]
    async fn test_http_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        let result = client.block_number().await;
        assert!(matches!(
            result,
            Err(AppError::Blockchain(BlockchainError::RpcError(_)))
        ));
    }

    #[tokio::test]
    async fn test_node_errors_are_classified_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": ["0x01"] })))
            .respond_with(rpc_error(-32000, "nonce too low"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": ["0x02"] })))
            .respond_with(rpc_error(-32000, "insufficient funds for gas * price + value"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "params": ["0x03"] })))
            .respond_with(rpc_error(3, "execution reverted"))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        assert!(matches!(
            client.send_raw_transaction("0x01").await,
            Err(AppError::Blockchain(BlockchainError::NonceTooLow(_)))
        ));
        assert!(matches!(
            client.send_raw_transaction("0x02").await,
            Err(AppError::Blockchain(BlockchainError::InsufficientFunds))
        ));
        assert!(matches!(
            client.send_raw_transaction("0x03").await,
            Err(AppError::Blockchain(BlockchainError::TransactionFailed(_)))
        ));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "eth_chainId" })))
            .respond_with(rpc_result(json!("0x539")))
            .mount(&server)
            .await;

        let client = RpcChainClient::new(&server.uri(), fast_retries()).unwrap();
        assert!(client.health_check().await.is_ok());
    }
}

// ============================================================================
// REMOTE SIGNER TESTS
// ============================================================================

mod signer_tests {
    use super::*;

    fn unsigned() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1337,
            from: "0x00000000000000000000000000000000000001f4".to_string(),
            to: "0x0000000000000000000000000000000000000384".to_string(),
            nonce: 3,
            gas_price: "1000000000".to_string(),
            gas_limit: 200_000,
            value: "0".to_string(),
            data: "0xa9059cbb".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sign_posts_transaction_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .and(header("authorization", "Bearer s3cret"))
            .and(body_partial_json(json!({ "chainId": 1337, "nonce": 3, "gasLimit": 200000 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "raw": "0xf86c03",
                "hash": "0x00000000000000000000000000000000000000000000000000000000000000CD"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let signer =
            HttpTransactionSigner::new(&format!("{}/", server.uri()), SecretString::from("s3cret"))
                .unwrap();
        let signed = signer.sign(&unsigned()).await.unwrap();
        assert_eq!(signed.raw, "0xf86c03");
        assert_eq!(
            signed.hash,
            "0x00000000000000000000000000000000000000000000000000000000000000cd"
        );
    }

    #[tokio::test]
    async fn test_sign_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let signer = HttpTransactionSigner::new(&server.uri(), SecretString::from("bad")).unwrap();
        assert!(matches!(
            signer.sign(&unsigned()).await,
            Err(AppError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_rejects_malformed_hash() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "raw": "0x01", "hash": "nope" })),
            )
            .mount(&server)
            .await;

        let signer = HttpTransactionSigner::new(&server.uri(), SecretString::from("t")).unwrap();
        assert!(matches!(
            signer.sign(&unsigned()).await,
            Err(AppError::ExternalService(
                ExternalServiceError::InvalidResponse(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_sign_rate_limited_and_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sign"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let signer = HttpTransactionSigner::new(&server.uri(), SecretString::from("t")).unwrap();
        assert!(matches!(
            signer.sign(&unsigned()).await,
            Err(AppError::ExternalService(ExternalServiceError::RateLimited(_)))
        ));
        let err = signer.sign(&unsigned()).await.unwrap_err();
        assert!(err.is_transient());
    }
}

// ============================================================================
// IDENTITY DIRECTORY TESTS
// ============================================================================

mod identity_directory_tests {
    use super::*;

    #[tokio::test]
    async fn test_identity_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/identities"))
            .and(query_param("type", "user"))
            .and(query_param("remoteId", "root"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1000,
                "identity_type": "user",
                "remote_id": "root",
                "display_name": "Root"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/identities/77"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let directory = HttpIdentityDirectory::new(&server.uri(), None).unwrap();
        let identity = directory
            .identity(WalletType::User, "root")
            .await
            .unwrap()
            .expect("identity exists");
        assert_eq!(identity.id, 1000);
        assert!(!identity.deleted);
        assert!(directory.identity_by_id(77).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_membership() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/memberships"))
            .and(query_param("user", "root"))
            .and(header("authorization", "Bearer dir-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "member": true })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/memberships"))
            .and(query_param("user", "mallory"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let directory =
            HttpIdentityDirectory::new(&server.uri(), Some(SecretString::from("dir-token")))
                .unwrap();
        assert!(
            directory
                .is_member_of("root", "/platform/rewarding")
                .await
                .unwrap()
        );
        assert!(
            !directory
                .is_member_of("mallory", "/platform/rewarding")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_directory_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let directory = HttpIdentityDirectory::new(&server.uri(), None).unwrap();
        assert!(matches!(
            directory.identity_by_id(1).await,
            Err(AppError::ExternalService(ExternalServiceError::Unavailable(_)))
        ));
    }
}

// ============================================================================
// POINT SOURCE TESTS
// ============================================================================

mod reward_plugin_tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_earned_points() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/points"))
            .and(body_partial_json(json!({
                "identityIds": [1, 2, 3],
                "start": 1_704_067_200,
                "end": 1_706_745_600
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "points": { "1": "12.5", "3": 4 }
            })))
            .mount(&server)
            .await;

        let plugin = HttpRewardPlugin::new("kudos", &server.uri()).unwrap();
        let points = plugin
            .earned_points(&[1, 2, 3], 1_704_067_200, 1_706_745_600)
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points.get(&1), Some(&dec!(12.5)));
        assert_eq!(points.get(&3), Some(&dec!(4)));
        assert!(!points.contains_key(&2));
    }

    #[tokio::test]
    async fn test_point_source_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/points"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let plugin = HttpRewardPlugin::new("kudos", &server.uri()).unwrap();
        assert!(matches!(
            plugin.earned_points(&[1], 0, 10).await,
            Err(AppError::ExternalService(ExternalServiceError::Unavailable(_)))
        ));
    }
}
