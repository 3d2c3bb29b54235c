use crate::posture::BoundingBox;

/// One detector output box in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: ObjectClass,
    pub confidence: f32,
}

impl Detection {
    pub fn person(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            class: ObjectClass::Person,
            confidence,
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Person,
    Other(u32),
}

impl ObjectClass {
    /// Map a COCO class index; 0 is person.
    pub fn from_coco(class_id: u32) -> Self {
        if class_id == 0 {
            ObjectClass::Person
        } else {
            ObjectClass::Other(class_id)
        }
    }

    pub fn coco_id(&self) -> u32 {
        match self {
            ObjectClass::Person => 0,
            ObjectClass::Other(id) => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_zero_is_person() {
        assert_eq!(ObjectClass::from_coco(0), ObjectClass::Person);
        assert_eq!(ObjectClass::from_coco(2), ObjectClass::Other(2));
        assert_eq!(ObjectClass::from_coco(17).coco_id(), 17);
    }
}
