//! Solidity bindings for the rollup inbox events, the proving call, and the
//! compose-verifier accessors.

use alloy_sol_types::sol;

sol! {
    #[derive(Debug, Default, PartialEq)]
    struct BatchMetadata {
        bytes32 infoHash;
        address proposer;
        uint64 batchId;
        uint64 proposedAt;
    }

    #[derive(Debug, Default, PartialEq)]
    struct BlockParams {
        uint16 numTransactions;
        uint8 timeShift;
        bytes32[] signalSlots;
    }

    #[derive(Debug, Default, PartialEq)]
    struct BaseFeeConfig {
        uint8 adjustmentQuotient;
        uint8 sharingPctg;
        uint32 gasIssuancePerSecond;
        uint64 minGasExcess;
        uint32 maxGasIssuancePerBlock;
    }

    #[derive(Debug, Default, PartialEq)]
    struct BatchInfo {
        bytes32 txsHash;
        BlockParams[] blocks;
        bytes32[] blobHashes;
        bytes32 extraData;
        address coinbase;
        uint64 proposedIn;
        uint64 blobCreatedIn;
        uint32 blobByteOffset;
        uint32 blobByteSize;
        uint32 gasLimit;
        uint64 lastBlockId;
        uint64 lastBlockTimestamp;
        uint64 anchorBlockId;
        bytes32 anchorBlockHash;
        BaseFeeConfig baseFeeConfig;
    }

    #[derive(Debug, Default, PartialEq)]
    struct Transition {
        bytes32 parentHash;
        bytes32 blockHash;
        bytes32 stateRoot;
    }

    #[derive(Debug, Default, PartialEq)]
    struct TransitionState {
        bytes32 parentHash;
        bytes32 blockHash;
        bytes32 stateRoot;
        address prover;
        bool inProvingWindow;
        uint48 createdAt;
    }

    #[derive(Debug, Default, PartialEq)]
    struct SubProof {
        address verifier;
        bytes proof;
    }

    #[derive(Debug)]
    event BatchProposed(BatchInfo info, BatchMetadata meta, bytes txList);

    #[derive(Debug)]
    event BatchesProved(address verifier, uint64[] batchIds, Transition[] transitions);

    #[derive(Debug)]
    event BatchesVerified(uint64 batchId, bytes32 blockHash);

    #[derive(Debug)]
    event ConflictingProof(uint64 batchId, TransitionState oldTran, Transition newTran);

    function proveBatches(bytes _params, bytes _proof) external;

    function sgxRethVerifier() external view returns (address);
    function sgxGethVerifier() external view returns (address);
    function tdxGethVerifier() external view returns (address);
    function risc0RethVerifier() external view returns (address);
    function sp1RethVerifier() external view returns (address);
}
