//! Centralized storage for WGSL kernel sources and the layout constants the
//! host code must agree with.

pub mod compute {
    pub const LATTICE_SDF: &str = include_str!("kernels/lattice_sdf.wgsl");

    /// Entry point every lattice model must export.
    pub const LATTICE_ENTRY_POINT: &str = "lattice_sdf";

    /// Must match `@workgroup_size` in the kernel.
    pub const LATTICE_WORKGROUP_SIZE: u32 = 64;

    /// Binding slots: rows (read-only storage), distances (storage), params (uniform).
    pub const ROWS_BINDING: u32 = 0;
    pub const DISTANCES_BINDING: u32 = 1;
    pub const PARAMS_BINDING: u32 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;
    use naga::valid::{Capabilities, ValidationFlags, Validator};

    fn parse_and_validate(label: &str, source: &str) -> naga::Module {
        let module =
            naga::front::wgsl::parse_str(source).unwrap_or_else(|err| panic!("{label}: {err:?}"));
        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        validator
            .validate(&module)
            .unwrap_or_else(|err| panic!("{label}: {err:?}"));
        module
    }

    #[test]
    fn lattice_kernel_validates() {
        parse_and_validate("lattice_sdf", compute::LATTICE_SDF);
    }

    #[test]
    fn lattice_kernel_exports_expected_entry_point() {
        let module = parse_and_validate("lattice_sdf", compute::LATTICE_SDF);
        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == compute::LATTICE_ENTRY_POINT)
            .expect("lattice entry point missing");
        assert_eq!(entry.stage, naga::ShaderStage::Compute);
        assert_eq!(entry.workgroup_size, [compute::LATTICE_WORKGROUP_SIZE, 1, 1]);
    }
}
