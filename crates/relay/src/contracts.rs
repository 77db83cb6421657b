//! Solidity surface of the relay hub, paymaster and forwarder.

use alloy_sol_types::sol;

sol! {
    /// Sponsor contract paying for relayed calls.
    interface IPaymaster {
        function getHubAddr() external view returns (address);
        function trustedForwarder() external view returns (address);
    }

    /// Hub where relay servers register and paymasters keep deposits.
    interface IRelayHub {
        function balanceOf(address target) external view returns (uint256);

        event RelayServerRegistered(
            address indexed relayManager,
            uint256 baseRelayFee,
            uint256 pctRelayFee,
            string relayUrl
        );

        event TransactionRejectedByPaymaster(
            address indexed relayManager,
            address indexed paymaster,
            address indexed from,
            address to,
            address relayWorker,
            bytes4 selector,
            uint256 innerGasUsed,
            bytes reason
        );

        event TransactionResult(uint8 status, bytes returnValue);
    }

    /// Forwarder verifying the user's signature on a relayed request.
    interface IForwarder {
        function getNonce(address from) external view returns (uint256);
    }
}
