//! Test suite for the training infrastructure
//!
//! Trainer tests drive [`crate::training::FoldTrainer`] end to end over mock
//! collaborators; metrics tests exercise the structural scoring engine
//! through its public tensor API.



// Re-export commonly used test utilities
pub use fixtures::{
    call_log, coords_tensor, mask_tensor, masked_out_batch, reference_points, structure_batch,
    structure_batch_with_recycling, tensor_scalar, test_config, CallLog, MockLoss, MockModel,
    MockOptimizer, TrainerHarness,
};
