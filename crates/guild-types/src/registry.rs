//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Every pluggable module (storage, clock time source, signer) exposes a
/// `Registry` type implementing this trait so the client builder can look the
/// implementation up by the name used in the TOML configuration.
pub trait ImplementationRegistry {
	/// Name used under `implementations.<NAME>` in the configuration, e.g.
	/// `"file"` for `storage.implementations.file` or `"evm"` for
	/// `signer.implementations.evm`.
	const NAME: &'static str;

	/// Factory function type for this kind of implementation.
	type Factory;

	/// Returns the factory that builds the implementation from its TOML table.
	fn factory() -> Self::Factory;
}
