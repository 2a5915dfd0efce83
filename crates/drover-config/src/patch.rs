use serde_yaml::Value;

use crate::error::GenError;

/// Merge `patch` into `base`: mappings merge key-wise, everything else
/// (sequences included) replaces wholesale.
pub fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Mapping(base_map), Value::Mapping(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge(base_value, patch_value),
                    None => {
                        base_map.insert(key, patch_value);
                    }
                }
            }
        }
        (slot, patch_value) => *slot = patch_value,
    }
}

/// Parse and apply an ordered list of YAML patches.
pub fn apply_patches(base: &mut Value, patches: &[String]) -> Result<(), GenError> {
    for patch in patches {
        if patch.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_yaml::from_str(patch).map_err(GenError::InvalidPatch)?;
        merge(base, parsed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn mappings_merge_and_scalars_replace() {
        let mut base = yaml("machine:\n  type: worker\n  install:\n    disk: /dev/sda\n");
        merge(&mut base, yaml("machine:\n  install:\n    disk: /dev/nvme0n1\n"));

        assert_eq!(base["machine"]["type"], yaml("worker"));
        assert_eq!(base["machine"]["install"]["disk"], yaml("/dev/nvme0n1"));
    }

    #[test]
    fn sequences_replace_wholesale() {
        let mut base = yaml("machine:\n  kernelArgs: [a, b]\n");
        merge(&mut base, yaml("machine:\n  kernelArgs: [c]\n"));
        assert_eq!(base["machine"]["kernelArgs"], yaml("[c]"));
    }

    #[test]
    fn later_patches_win() {
        let mut base = yaml("machine:\n  env: {}\n");
        apply_patches(
            &mut base,
            &["machine:\n  env:\n    HTTP_PROXY: one\n".to_string(),
                "machine:\n  env:\n    HTTP_PROXY: two\n".to_string()],
        )
        .unwrap();
        assert_eq!(base["machine"]["env"]["HTTP_PROXY"], yaml("two"));
    }

    #[test]
    fn invalid_patch_is_rejected() {
        let mut base = yaml("a: 1");
        let err = apply_patches(&mut base, &["{not yaml".to_string()]).unwrap_err();
        assert!(matches!(err, GenError::InvalidPatch(_)));
    }
}
