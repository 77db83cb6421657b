//! Solidity surface of the identity registry contract.

use alloy_sol_types::sol;

sol! {
    interface IIdentityRegistry {
        function walletOfOwner(address owner) external view returns (uint256);

        function profiles(uint256 tokenId) external view returns (
            uint256 id,
            address ownerAddress,
            uint256 platformId,
            string handle,
            string dataUri
        );

        function mint(uint256 platformId, string handle) external payable;
    }
}
