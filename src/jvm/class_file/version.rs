use crate::jvm::class_file::Serialize;
use byteorder::WriteBytesExt;
use std::io::Result;

/// Version of the class file, which is used to verify that the JVM has the
/// necessary features to interpret the class
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Version {
    pub major_version: u16,
    pub minor_version: u16,
}

impl Version {
    /// Java SE 5 (last version without `StackMapTable`)
    pub const JAVA5: Version = Version::new(49);

    /// Java SE 6 (first version with `StackMapTable`)
    pub const JAVA6: Version = Version::new(50);

    /// Java SE 7 (`StackMapTable` becomes mandatory)
    pub const JAVA7: Version = Version::new(51);

    /// Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version::new(52);

    pub const JAVA11: Version = Version::new(55);

    pub const JAVA17: Version = Version::new(61);

    pub const fn new(major_version: u16) -> Version {
        Version {
            major_version,
            minor_version: 0,
        }
    }

    /// Do methods in class files of this version carry stack map frames?
    pub fn supports_stack_maps(&self) -> bool {
        *self >= Version::JAVA6
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}
